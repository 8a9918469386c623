//! Test utilities and fixtures.
//!
//! Scripted stand-ins for the metadata service and the audio fetcher, plus
//! a config factory with rate limiting disabled so tests never sleep.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::{AudioFetcher, AudioOrigin, PlaylistInfo, VideoMetadata};
use crate::config::{AudioFormat, Config, RateLimit};
use crate::error::{Error, Result};
use crate::spotify::{adapter, dto, MetadataFetcher};

/// A valid config with credentials set and every limiter disabled.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.download.client_id = "test-client".to_string();
    config.download.client_secret = "test-secret".to_string();
    config.download.threads = 2;
    config.cache.sweep_interval_seconds = 0;
    let off = RateLimit {
        enabled: false,
        requests: 0,
        window_seconds: 0.0,
    };
    config.rate_limits.spotify = off.clone();
    config.rate_limits.youtube = off.clone();
    config.rate_limits.youtube_music = off.clone();
    config.rate_limits.soundcloud = off.clone();
    config.rate_limits.download = off;
    config
}

// ============================================================================
// Metadata service stub
// ============================================================================

/// Scripted [`MetadataFetcher`] with call counters.
#[derive(Default)]
pub struct StubMetadataFetcher {
    tracks: Mutex<HashMap<String, dto::TrackObject>>,
    albums: Mutex<HashMap<String, dto::AlbumObject>>,
    artists: Mutex<HashMap<String, dto::ArtistObject>>,
    playlists: Mutex<HashMap<String, dto::PlaylistObject>>,
    artist_album_pages: Mutex<HashMap<String, Vec<dto::Paging<dto::AlbumSummaryObject>>>>,
    playlist_track_pages: Mutex<HashMap<String, Vec<dto::Paging<dto::PlaylistTrackObject>>>>,
    cursors: Mutex<HashMap<String, usize>>,
    search_results: Mutex<HashMap<String, Vec<dto::TrackObject>>>,
    track_failures: Mutex<VecDeque<Error>>,
    search_failures: Mutex<VecDeque<Error>>,
    pub track_calls: Arc<AtomicU32>,
    pub search_calls: Arc<AtomicU32>,
}

impl StubMetadataFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn cover_image() -> dto::Image {
        dto::Image {
            url: "https://img.example/cover.jpg".to_string(),
            width: Some(640),
            height: Some(640),
        }
    }

    fn track_object(id: &str, name: &str, artist: &str, album: Option<dto::AlbumRef>) -> dto::TrackObject {
        dto::TrackObject {
            id: id.to_string(),
            name: name.to_string(),
            artists: vec![dto::ArtistRef {
                id: format!("artist-of-{}", id),
                name: artist.to_string(),
            }],
            album,
            track_number: 1,
            disc_number: 1,
            duration_ms: 180_000,
            explicit: false,
            external_ids: None,
        }
    }

    /// Register a full track whose album reference resolves to `album_id`.
    pub fn add_track(&self, id: &str, name: &str, artist: &str, album_id: &str, album_name: &str) {
        let album = dto::AlbumRef {
            id: album_id.to_string(),
            name: album_name.to_string(),
            artists: vec![dto::ArtistRef {
                id: String::new(),
                name: artist.to_string(),
            }],
            release_date: Some("2001".to_string()),
            images: vec![Self::cover_image()],
            total_tracks: Some(10),
        };
        self.tracks
            .lock()
            .insert(id.to_string(), Self::track_object(id, name, artist, Some(album)));
    }

    /// Register a track the catalog has no album for.
    pub fn add_track_without_album(&self, id: &str, name: &str, artist: &str) {
        self.tracks
            .lock()
            .insert(id.to_string(), Self::track_object(id, name, artist, None));
    }

    pub fn add_album_with_tracks(
        &self,
        id: &str,
        name: &str,
        artist: &str,
        release_date: &str,
        tracks: Vec<(&str, &str, u32)>,
    ) {
        let items = tracks
            .into_iter()
            .map(|(track_id, track_name, number)| {
                let mut track = Self::track_object(track_id, track_name, artist, None);
                track.track_number = number;
                track
            })
            .collect::<Vec<_>>();
        let album = dto::AlbumObject {
            id: id.to_string(),
            name: name.to_string(),
            artists: vec![dto::ArtistRef {
                id: String::new(),
                name: artist.to_string(),
            }],
            release_date: Some(release_date.to_string()),
            images: vec![Self::cover_image()],
            total_tracks: items.len() as u32,
            tracks: dto::Paging {
                total: items.len() as u32,
                items,
                next: None,
            },
        };
        self.albums.lock().insert(id.to_string(), album);
    }

    pub fn add_artist(&self, id: &str, name: &str) {
        self.artists.lock().insert(
            id.to_string(),
            dto::ArtistObject {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Append a discography page; `next` names the cursor leading to the
    /// page added after this one.
    pub fn add_artist_albums_page(
        &self,
        artist_id: &str,
        albums: Vec<(&str, &str, &str)>,
        next: Option<&str>,
    ) {
        let mut pages = self.artist_album_pages.lock();
        let list = pages.entry(artist_id.to_string()).or_default();
        if let Some(cursor) = next {
            self.cursors.lock().insert(cursor.to_string(), list.len() + 1);
        }
        list.push(dto::Paging {
            total: albums.len() as u32,
            items: albums
                .into_iter()
                .map(|(id, name, group)| dto::AlbumSummaryObject {
                    id: id.to_string(),
                    name: name.to_string(),
                    album_group: group.to_string(),
                    total_tracks: 1,
                })
                .collect(),
            next: next.map(str::to_string),
        });
    }

    /// Register a playlist whose first page holds `rows` (None = null row).
    pub fn add_playlist(
        &self,
        id: &str,
        name: &str,
        rows: Vec<Option<(&str, &str, &str)>>,
        next: Option<&str>,
    ) {
        let playlist = dto::PlaylistObject {
            id: id.to_string(),
            name: name.to_string(),
            tracks: dto::Paging {
                total: rows.len() as u32,
                items: rows.into_iter().map(Self::playlist_row).collect(),
                next: next.map(str::to_string),
            },
        };
        self.playlists.lock().insert(id.to_string(), playlist);
        if let Some(cursor) = next {
            self.cursors.lock().insert(cursor.to_string(), 0);
        }
    }

    pub fn add_playlist_tracks_page(
        &self,
        playlist_id: &str,
        rows: Vec<Option<(&str, &str, &str)>>,
        next: Option<&str>,
    ) {
        let mut pages = self.playlist_track_pages.lock();
        let list = pages.entry(playlist_id.to_string()).or_default();
        if let Some(cursor) = next {
            self.cursors.lock().insert(cursor.to_string(), list.len() + 1);
        }
        list.push(dto::Paging {
            total: rows.len() as u32,
            items: rows.into_iter().map(Self::playlist_row).collect(),
            next: next.map(str::to_string),
        });
    }

    fn playlist_row(row: Option<(&str, &str, &str)>) -> dto::PlaylistTrackObject {
        dto::PlaylistTrackObject {
            track: row.map(|(id, name, artist)| {
                let album = dto::AlbumRef {
                    id: format!("album-of-{}", id),
                    name: format!("Album of {}", name),
                    release_date: Some("2001".to_string()),
                    ..Default::default()
                };
                Self::track_object(id, name, artist, Some(album))
            }),
        }
    }

    /// Register search results under the normalized query.
    pub fn add_search_result(&self, query: &str, id: &str, name: &str, artist: &str) {
        let album = dto::AlbumRef {
            id: format!("album-of-{}", id),
            name: "X".to_string(),
            ..Default::default()
        };
        self.search_results
            .lock()
            .entry(adapter::normalize_query(query))
            .or_default()
            .push(Self::track_object(id, name, artist, Some(album)));
    }

    pub fn fail_next_track(&self, error: Error) {
        self.track_failures.lock().push_back(error);
    }

    pub fn fail_next_search(&self, error: Error) {
        self.search_failures.lock().push_back(error);
    }
}

#[async_trait]
impl MetadataFetcher for StubMetadataFetcher {
    async fn track(&self, id: &str) -> Result<dto::TrackObject> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.track_failures.lock().pop_front() {
            return Err(error);
        }
        self.tracks
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("stub has no track {}", id)))
    }

    async fn album(&self, id: &str) -> Result<dto::AlbumObject> {
        self.albums
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("stub has no album {}", id)))
    }

    async fn playlist(&self, id: &str) -> Result<dto::PlaylistObject> {
        self.playlists
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("stub has no playlist {}", id)))
    }

    async fn artist(&self, id: &str) -> Result<dto::ArtistObject> {
        self.artists
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("stub has no artist {}", id)))
    }

    async fn artist_albums(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::Paging<dto::AlbumSummaryObject>> {
        let index = match cursor {
            None => 0,
            Some(c) => *self
                .cursors
                .lock()
                .get(c)
                .ok_or_else(|| Error::upstream(format!("stub has no cursor {}", c)))?,
        };
        self.artist_album_pages
            .lock()
            .get(id)
            .and_then(|pages| pages.get(index))
            .cloned()
            .ok_or_else(|| Error::upstream(format!("stub has no album page {} for {}", index, id)))
    }

    async fn playlist_tracks(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::Paging<dto::PlaylistTrackObject>> {
        let index = match cursor {
            None => 0,
            Some(c) => *self
                .cursors
                .lock()
                .get(c)
                .ok_or_else(|| Error::upstream(format!("stub has no cursor {}", c)))?,
        };
        self.playlist_track_pages
            .lock()
            .get(id)
            .and_then(|pages| pages.get(index))
            .cloned()
            .ok_or_else(|| Error::upstream(format!("stub has no track page {} for {}", index, id)))
    }

    async fn search_tracks(&self, query: &str) -> Result<dto::Paging<dto::TrackObject>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.search_failures.lock().pop_front() {
            return Err(error);
        }
        let items = self
            .search_results
            .lock()
            .get(&adapter::normalize_query(query))
            .cloned()
            .unwrap_or_default();
        Ok(dto::Paging {
            total: items.len() as u32,
            items,
            next: None,
        })
    }
}

// ============================================================================
// Audio fetcher stub
// ============================================================================

/// Scripted [`AudioFetcher`] that "downloads" by writing a small file.
#[derive(Default)]
pub struct StubAudioFetcher {
    searches: Mutex<HashMap<(AudioOrigin, String), String>>,
    videos: Mutex<HashMap<String, VideoMetadata>>,
    playlists: Mutex<HashMap<String, PlaylistInfo>>,
    search_failures: Mutex<VecDeque<Error>>,
    download_failures: Mutex<VecDeque<Error>>,
    download_extension: Mutex<Option<String>>,
    pub search_calls: Arc<AtomicU32>,
    pub download_calls: Arc<AtomicU32>,
    pub metadata_calls: Arc<AtomicU32>,
}

impl StubAudioFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search(&self, origin: AudioOrigin, query: &str, url: &str) {
        self.searches
            .lock()
            .insert((origin, adapter::normalize_query(query)), url.to_string());
    }

    pub fn add_video(&self, url: &str, video: VideoMetadata) {
        self.videos.lock().insert(url.to_string(), video);
    }

    pub fn add_playlist(&self, url: &str, info: PlaylistInfo) {
        self.playlists.lock().insert(url.to_string(), info);
    }

    pub fn fail_next_search(&self, error: Error) {
        self.search_failures.lock().push_back(error);
    }

    pub fn fail_next_download(&self, error: Error) {
        self.download_failures.lock().push_back(error);
    }

    /// Pretend the fetcher transcodes to `ext` instead of the asked format.
    pub fn set_download_extension(&self, ext: &str) {
        *self.download_extension.lock() = Some(ext.to_string());
    }
}

#[async_trait]
impl AudioFetcher for StubAudioFetcher {
    async fn search(&self, origin: AudioOrigin, query: &str) -> Result<Option<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.search_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(self
            .searches
            .lock()
            .get(&(origin, adapter::normalize_query(query)))
            .cloned())
    }

    async fn download(
        &self,
        _url: &str,
        output: &Path,
        _format: AudioFormat,
        _bitrate: &str,
    ) -> Result<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.download_failures.lock().pop_front() {
            return Err(error);
        }
        let path = match self.download_extension.lock().as_deref() {
            Some(ext) => output.with_extension(ext),
            None => output.to_path_buf(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"")?;
        Ok(())
    }

    async fn video_metadata(&self, url: &str) -> Result<VideoMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.videos
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::download(format!("stub has no video {}", url)))
    }

    async fn playlist_info(&self, url: &str) -> Result<PlaylistInfo> {
        self.playlists
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::download(format!("stub has no playlist {}", url)))
    }
}
