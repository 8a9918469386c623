//! Wire types for the metadata-service Web API.
//!
//! These mirror the JSON the service actually returns; all mapping into
//! our domain types happens in the adapter. Every field is defaulted so a
//! partial response degrades instead of failing deserialization.

use serde::Deserialize;

/// A cursor-paged envelope. `next` is a full URL or null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Paging<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
    pub total: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExternalIds {
    pub isrc: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<String>,
    pub images: Vec<Image>,
    pub total_tracks: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackObject {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    /// Present on full track objects, absent on album-nested ones
    pub album: Option<AlbumRef>,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration_ms: u64,
    pub explicit: bool,
    pub external_ids: Option<ExternalIds>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlbumObject {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<String>,
    pub images: Vec<Image>,
    pub total_tracks: u32,
    pub tracks: Paging<TrackObject>,
}

/// Album entry in an artist discography listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlbumSummaryObject {
    pub id: String,
    pub name: String,
    /// "album", "single", "compilation", or "appears_on"
    pub album_group: String,
    pub total_tracks: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtistObject {
    pub id: String,
    pub name: String,
}

/// Playlist entry wrapper; `track` is null for removed or unplayable rows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistTrackObject {
    pub track: Option<TrackObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistObject {
    pub id: String,
    pub name: String,
    pub tracks: Paging<PlaylistTrackObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub tracks: Option<Paging<TrackObject>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiErrorBody {
    pub status: u16,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_object_tolerates_missing_fields() {
        let track: TrackObject = serde_json::from_str(r#"{"id": "t1", "name": "Song"}"#).unwrap();
        assert_eq!(track.id, "t1");
        assert!(track.album.is_none());
        assert_eq!(track.track_number, 0);
    }

    #[test]
    fn test_paging_next_null() {
        let page: Paging<TrackObject> =
            serde_json::from_str(r#"{"items": [], "next": null, "total": 0}"#).unwrap();
        assert!(page.next.is_none());
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_playlist_row_with_null_track() {
        let row: PlaylistTrackObject = serde_json::from_str(r#"{"track": null}"#).unwrap();
        assert!(row.track.is_none());
    }
}
