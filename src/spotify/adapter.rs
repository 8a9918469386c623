//! Conversion between wire DTOs and our domain types.
//!
//! All external API shapes get converted here; nothing downstream of the
//! client sees a DTO. Also home to the URL/URI → ID extraction and the
//! small string helpers the cache keys depend on.

use super::dto;
use super::{AlbumDetails, AlbumSummary, ArtistDetails, EntityKind, PlaylistDetails, TrackDetails};

/// Convert a full track object, preferring `album_ref` when the track's own
/// album field is absent (album-nested tracks).
pub fn to_track(track: dto::TrackObject, album_ref: Option<&dto::AlbumRef>) -> TrackDetails {
    let own_album = track.album.as_ref();
    let album = own_album.or(album_ref);
    TrackDetails {
        id: track.id,
        name: track.name,
        artists: track.artists.iter().map(|a| a.name.clone()).collect(),
        album_id: album.map(|a| a.id.clone()).filter(|id| !id.is_empty()),
        album_name: album.map(|a| a.name.clone()),
        album_artist: album
            .and_then(|a| a.artists.first())
            .map(|a| a.name.clone()),
        track_number: track.track_number,
        disc_number: track.disc_number.max(1),
        duration_secs: (track.duration_ms / 1000) as u32,
        explicit: track.explicit,
        isrc: track.external_ids.and_then(|ids| ids.isrc),
        release_date: album.and_then(|a| a.release_date.clone()),
        cover_url: album.and_then(largest_image),
        total_tracks: album.and_then(|a| a.total_tracks),
    }
}

pub fn to_album(album: dto::AlbumObject) -> AlbumDetails {
    let album_ref = dto::AlbumRef {
        id: album.id.clone(),
        name: album.name.clone(),
        artists: album.artists.clone(),
        release_date: album.release_date.clone(),
        images: album.images.clone(),
        total_tracks: Some(album.total_tracks),
    };
    AlbumDetails {
        id: album.id,
        name: album.name,
        artists: album.artists.iter().map(|a| a.name.clone()).collect(),
        release_date: album.release_date.unwrap_or_default(),
        cover_url: largest_image(&album_ref),
        total_tracks: album.total_tracks,
        tracks: album
            .tracks
            .items
            .into_iter()
            .map(|t| to_track(t, Some(&album_ref)))
            .collect(),
    }
}

pub fn to_album_summary(summary: dto::AlbumSummaryObject) -> AlbumSummary {
    AlbumSummary {
        id: summary.id,
        name: summary.name,
        album_group: summary.album_group,
        total_tracks: summary.total_tracks,
    }
}

pub fn to_artist(artist: dto::ArtistObject) -> ArtistDetails {
    ArtistDetails {
        id: artist.id,
        name: artist.name,
    }
}

pub fn to_playlist(playlist: dto::PlaylistObject, tracks: Vec<TrackDetails>) -> PlaylistDetails {
    PlaylistDetails {
        id: playlist.id,
        name: playlist.name,
        tracks,
    }
}

/// Pick the largest cover image by area.
fn largest_image(album: &dto::AlbumRef) -> Option<String> {
    album
        .images
        .iter()
        .max_by_key(|img| img.width.unwrap_or(0) * img.height.unwrap_or(0))
        .map(|img| img.url.clone())
}

// ============================================================================
// URL handling
// ============================================================================

/// Extract the canonical entity ID from a share URL, URI, or bare ID.
///
/// Accepts `https://open.spotify.com/{kind}/{id}?si=…`,
/// `spotify:{kind}:{id}`, and a bare ID. Idempotent: extracting from an
/// already-extracted ID returns it unchanged.
pub fn extract_id(kind: EntityKind, input: &str) -> Option<String> {
    let input = input.trim();
    let kind_str = kind.as_str();

    if let Some(rest) = input.strip_prefix("spotify:") {
        let mut parts = rest.splitn(2, ':');
        if parts.next() == Some(kind_str) {
            return parts.next().map(str::to_string).filter(|s| !s.is_empty());
        }
        return None;
    }

    if let Some(pos) = input.find(&format!("/{}/", kind_str)) {
        let id = &input[pos + kind_str.len() + 2..];
        let id: String = id
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        return (!id.is_empty()).then_some(id);
    }

    // Bare catalog ID: base62, no separators.
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(input.to_string());
    }
    None
}

/// Classify a metadata-service URL into (kind, id).
pub fn classify_url(url: &str) -> Option<(EntityKind, String)> {
    for kind in [
        EntityKind::Track,
        EntityKind::Album,
        EntityKind::Playlist,
        EntityKind::Artist,
    ] {
        let marker = format!("/{}/", kind.as_str());
        let uri_marker = format!("spotify:{}:", kind.as_str());
        if url.contains(&marker) || url.starts_with(&uri_marker) {
            return extract_id(kind, url).map(|id| (kind, id));
        }
    }
    None
}

// ============================================================================
// String helpers
// ============================================================================

/// Parse a release date (`YYYY`, `YYYY-MM`, or `YYYY-MM-DD`) into a year.
///
/// Returns 0 for empty or unparseable input.
pub fn extract_year(date: &str) -> i32 {
    let year_part = date.trim().split('-').next().unwrap_or("");
    if year_part.len() == 4 {
        year_part.parse().unwrap_or(0)
    } else {
        0
    }
}

/// Normalize a free-text search query: trim, lowercase, collapse whitespace.
///
/// Idempotent, so it is safe to apply to already-normalized cache keys.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
