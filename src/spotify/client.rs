//! Cached, rate-limited facade over the metadata service.
//!
//! Every lookup follows the same path: canonical ID → cache check → rate
//! limiter(s) → fetch → cache fill. Successes clear the rate-limit
//! tracker; 429-family failures record the Retry-After deadline in it.
//!
//! Paginated lookups (artist discographies, playlist tracks) loop on the
//! server cursor until exhausted, re-applying rate limiting per page and
//! honoring cancellation between pages.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{adapter, AlbumDetails, AlbumSummary, ArtistDetails, EntityKind, MetadataFetcher, PlaylistDetails, TrackDetails};
use crate::cache::store::StateStore;
use crate::cache::{CacheStats, TtlCache};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ratelimit::{RateLimitTracker, SlidingWindowLimiter};

/// Cached, rate-limited entry point for metadata lookups.
pub struct MetadataClient {
    fetcher: Arc<dyn MetadataFetcher>,
    tracks: TtlCache<String, TrackDetails>,
    albums: TtlCache<String, AlbumDetails>,
    playlists: TtlCache<String, PlaylistDetails>,
    artists: TtlCache<String, ArtistDetails>,
    discographies: TtlCache<String, Vec<AlbumSummary>>,
    searches: TtlCache<String, Vec<TrackDetails>>,
    limiter: SlidingWindowLimiter,
    general_limiter: Option<Arc<SlidingWindowLimiter>>,
    tracker: Arc<RateLimitTracker>,
    store: Option<Arc<StateStore>>,
}

impl MetadataClient {
    pub fn new(
        fetcher: Arc<dyn MetadataFetcher>,
        config: &Config,
        tracker: Arc<RateLimitTracker>,
        general_limiter: Option<Arc<SlidingWindowLimiter>>,
        store: Option<Arc<StateStore>>,
    ) -> Self {
        let max = config.cache.metadata_max_size;
        let ttl = Duration::from_secs(config.cache.metadata_ttl_seconds);
        Self {
            fetcher,
            tracks: TtlCache::new(max, ttl),
            albums: TtlCache::new(max, ttl),
            playlists: TtlCache::new(max, ttl),
            artists: TtlCache::new(max, ttl),
            discographies: TtlCache::new(max, ttl),
            searches: TtlCache::new(max, ttl),
            limiter: SlidingWindowLimiter::from_config(&config.rate_limits.spotify),
            general_limiter,
            tracker,
            store,
        }
    }

    /// Shared rate-limit state observed from upstream responses.
    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    /// Drop expired entries across every cache tier; returns the count.
    pub fn evict_expired(&self) -> usize {
        self.tracks.evict_expired()
            + self.albums.evict_expired()
            + self.playlists.evict_expired()
            + self.artists.evict_expired()
            + self.discographies.evict_expired()
            + self.searches.evict_expired()
    }

    /// Per-cache hit/miss counters, for status reporting.
    pub fn cache_stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            ("tracks", self.tracks.stats()),
            ("albums", self.albums.stats()),
            ("playlists", self.playlists.stats()),
            ("artists", self.artists.stats()),
            ("discographies", self.discographies.stats()),
            ("searches", self.searches.stats()),
        ]
    }

    /// Fetch a track by URL, URI, or bare ID.
    pub async fn get_track(&self, input: &str, cancel: &CancellationToken) -> Result<TrackDetails> {
        let id = canonical_id(EntityKind::Track, input)?;
        if let Some(hit) = self.tracks.get(&id) {
            return Ok(hit);
        }
        if let Some(persisted) = self.store_get::<TrackDetails>("track", &id) {
            self.tracks.insert(id.clone(), persisted.clone());
            return Ok(persisted);
        }

        self.admit(cancel).await?;
        let track = self
            .observe(self.fetcher.track(&id).await)
            .map(|dto| adapter::to_track(dto, None))?;
        self.tracks.insert(id.clone(), track.clone());
        self.store_put("track", &id, &track);
        Ok(track)
    }

    /// Fetch an album with its full track listing.
    pub async fn get_album(&self, input: &str, cancel: &CancellationToken) -> Result<AlbumDetails> {
        let id = canonical_id(EntityKind::Album, input)?;
        if let Some(hit) = self.albums.get(&id) {
            return Ok(hit);
        }
        if let Some(persisted) = self.store_get::<AlbumDetails>("album", &id) {
            self.albums.insert(id.clone(), persisted.clone());
            return Ok(persisted);
        }

        self.admit(cancel).await?;
        let album = self
            .observe(self.fetcher.album(&id).await)
            .map(adapter::to_album)?;
        self.albums.insert(id.clone(), album.clone());
        self.store_put("album", &id, &album);
        Ok(album)
    }

    /// Fetch a playlist, accumulating every page of its tracks.
    pub async fn get_playlist(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaylistDetails> {
        let id = canonical_id(EntityKind::Playlist, input)?;
        if let Some(hit) = self.playlists.get(&id) {
            return Ok(hit);
        }

        self.admit(cancel).await?;
        let playlist = self.observe(self.fetcher.playlist(&id).await)?;

        let mut tracks: Vec<TrackDetails> = playlist
            .tracks
            .items
            .iter()
            .filter_map(|row| row.track.clone())
            .map(|t| adapter::to_track(t, None))
            .collect();
        let mut cursor = playlist.tracks.next.clone();
        while let Some(next) = cursor {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.admit(cancel).await?;
            let page = self
                .observe(self.fetcher.playlist_tracks(&id, Some(&next)).await)?;
            tracks.extend(
                page.items
                    .into_iter()
                    .filter_map(|row| row.track)
                    .map(|t| adapter::to_track(t, None)),
            );
            cursor = page.next;
        }

        let details = adapter::to_playlist(playlist, tracks);
        self.playlists.insert(id, details.clone());
        Ok(details)
    }

    /// Fetch an artist profile.
    pub async fn get_artist(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<ArtistDetails> {
        let id = canonical_id(EntityKind::Artist, input)?;
        if let Some(hit) = self.artists.get(&id) {
            return Ok(hit);
        }

        self.admit(cancel).await?;
        let artist = self
            .observe(self.fetcher.artist(&id).await)
            .map(adapter::to_artist)?;
        self.artists.insert(id, artist.clone());
        Ok(artist)
    }

    /// Fetch an artist's discography, filtered to albums and singles.
    ///
    /// Compilations and appears-on entries are excluded.
    pub async fn get_artist_albums(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<AlbumSummary>> {
        let id = canonical_id(EntityKind::Artist, input)?;
        if let Some(hit) = self.discographies.get(&id) {
            return Ok(hit);
        }

        let mut albums = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.admit(cancel).await?;
            let page = self
                .observe(self.fetcher.artist_albums(&id, cursor.as_deref()).await)?;
            albums.extend(
                page.items
                    .into_iter()
                    .filter(|a| matches!(a.album_group.as_str(), "album" | "single"))
                    .map(adapter::to_album_summary),
            );
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.discographies.insert(id, albums.clone());
        Ok(albums)
    }

    /// Search for tracks matching a free-text query.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TrackDetails>> {
        let key = adapter::normalize_query(query);
        if let Some(hit) = self.searches.get(&key) {
            return Ok(hit);
        }

        self.admit(cancel).await?;
        let page = self.observe(self.fetcher.search_tracks(&key).await)?;
        let results: Vec<TrackDetails> = page
            .items
            .into_iter()
            .map(|t| adapter::to_track(t, None))
            .collect();
        self.searches.insert(key, results.clone());
        Ok(results)
    }

    /// Wait on the overall download limiter, then this client's own window.
    async fn admit(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(general) = &self.general_limiter {
            general.wait_if_needed(cancel).await?;
        }
        self.limiter.wait_if_needed(cancel).await
    }

    /// Apply rate-limit bookkeeping to a fetch outcome.
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.tracker.clear();
                Ok(value)
            }
            Err(err) => {
                let err = reclassify(err);
                if let Error::RateLimited { seconds, origin } = &err {
                    tracing::warn!(seconds, origin = %origin, "Upstream rate limit hit");
                    self.tracker.update(*seconds);
                }
                Err(err)
            }
        }
    }

    fn store_get<T: serde::de::DeserializeOwned>(&self, kind: &str, id: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        let value = store.get_metadata(&format!("{}:{}", kind, id))?;
        serde_json::from_value(value).ok()
    }

    fn store_put<T: serde::Serialize>(&self, kind: &str, id: &str, value: &T) {
        if let Some(store) = &self.store
            && let Ok(json) = serde_json::to_value(value)
        {
            store.put_metadata(format!("{}:{}", kind, id), json);
        }
    }
}

fn canonical_id(kind: EntityKind, input: &str) -> Result<String> {
    adapter::extract_id(kind, input)
        .ok_or_else(|| Error::upstream(format!("unrecognized {} reference: {}", kind.as_str(), input)))
}

/// Fold message-level rate-limit signals into the typed variant.
///
/// Some upstream layers surface 429s as plain error strings; treat those
/// the same as a typed 429 with the default one-second Retry-After.
fn reclassify(err: Error) -> Error {
    if let Error::Upstream(message) = &err {
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
        {
            return Error::RateLimited {
                seconds: 1.0,
                origin: "spotify".to_string(),
            };
        }
    }
    err
}
