//! Per-item download work unit.
//!
//! One call to [`TrackDownloader::download_track`] takes a plan item all
//! the way from metadata resolution to a tagged file on disk:
//!
//! 1. Resolve the source (metadata-service track vs direct audio URL)
//! 2. Assemble the [`Song`] record (tags, cover, numbering)
//! 3. Render the output path and apply the overwrite mode
//! 4. Search the audio origins (service-sourced items only)
//! 5. Download, embed tags, verify
//!
//! A retry wrapper with exponential backoff surrounds the whole attempt;
//! rate-limit errors extend the delay by the server's Retry-After. Embed
//! failures are logged but never fail the item (the audio is already on
//! disk by then).

pub mod template;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioProvider, VideoMetadata};
use crate::cache::store::{DownloadRecord, StateStore};
use crate::config::{AudioFormat, Config, OverwriteMode};
use crate::error::{Error, Result};
use crate::plan::{meta_keys, PlanItem};
use crate::spotify::{adapter, MetadataClient, TrackDetails};
use crate::tagger::Tagger;

/// Album name given to direct-audio items before enhancement.
const DEFAULT_AUDIO_ALBUM: &str = "YouTube";

/// Added to the server's Retry-After before the next attempt.
const RATE_LIMIT_DELAY_PADDING: f64 = 10.0;

/// The assembled tag record handed to the path template and the embedder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub track_number: u32,
    pub disc_number: u32,
    pub year: i32,
    pub date: String,
    pub isrc: Option<String>,
    pub cover_url: Option<String>,
    pub total_tracks: Option<u32>,
    pub explicit: bool,
    pub duration_secs: u32,
}

/// How an item reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Audio was fetched this run
    Downloaded,
    /// The file already existed; item completes without a fetch
    SkippedExisting,
    /// A previous run already produced this file (item is skipped)
    AlreadyDownloaded,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub kind: OutcomeKind,
    pub attempts: u32,
}

/// Bounded cache of known file-existence answers.
///
/// Avoids a stat call per item on large resumed runs. When full, a tenth
/// of the entries are evicted to make room.
struct FileExistenceCache {
    entries: RwLock<HashMap<PathBuf, bool>>,
    max_size: usize,
}

impl FileExistenceCache {
    fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: max_size.max(10),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        if let Some(known) = self.entries.read().get(path) {
            return *known;
        }
        let exists = path.exists();
        let mut entries = self.entries.write();
        if entries.len() >= self.max_size {
            let to_evict: Vec<PathBuf> = entries
                .keys()
                .take(self.max_size / 10)
                .cloned()
                .collect();
            for key in to_evict {
                entries.remove(&key);
            }
        }
        entries.insert(path.to_path_buf(), exists);
        exists
    }

    fn invalidate(&self, path: &Path) {
        self.entries.write().remove(path);
    }
}

pub struct TrackDownloader {
    spotify: Arc<MetadataClient>,
    audio: Arc<AudioProvider>,
    tagger: Arc<Tagger>,
    store: Option<Arc<StateStore>>,
    history: Option<Arc<crate::history::HistoryTracker>>,
    file_cache: FileExistenceCache,
    output_template: String,
    format: AudioFormat,
    overwrite: OverwriteMode,
    max_retries: u32,
}

impl TrackDownloader {
    pub fn new(
        spotify: Arc<MetadataClient>,
        audio: Arc<AudioProvider>,
        tagger: Arc<Tagger>,
        store: Option<Arc<StateStore>>,
        config: &Config,
    ) -> Self {
        Self {
            spotify,
            audio,
            tagger,
            store,
            history: None,
            file_cache: FileExistenceCache::new(config.cache.file_exists_max_size),
            output_template: config.download.output.clone(),
            format: config.download.format,
            overwrite: config.download.overwrite,
            max_retries: config.download.max_retries.max(1),
        }
    }

    /// Record rate-limit detections in the activity log.
    pub fn with_history(mut self, history: Arc<crate::history::HistoryTracker>) -> Self {
        self.history = Some(history);
        self
    }

    /// Run the full per-item algorithm with retries.
    pub async fn download_track(
        &self,
        item: &PlanItem,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.attempt(item, cancel).await {
                Ok((path, kind)) => {
                    self.record_success(item, &path);
                    return Ok(DownloadOutcome {
                        path,
                        kind,
                        attempts,
                    });
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if !e.is_retriable() => {
                    self.record_failure(item, &e);
                    return Err(e);
                }
                // IO errors are retried once, then treated as terminal.
                Err(e) if e.is_io() && attempts >= 2 => {
                    self.record_failure(item, &e);
                    return Err(e);
                }
                Err(e) if attempts >= self.max_retries => {
                    self.record_failure(item, &e);
                    return Err(e);
                }
                Err(e) => {
                    if let Error::RateLimited { seconds, origin } = &e
                        && let Some(history) = &self.history
                    {
                        history.log_rate_limit(origin, *seconds);
                    }
                    let delay = match e.retry_after() {
                        Some(retry_after) if retry_after > 0.0 => {
                            Duration::from_secs_f64(retry_after + RATE_LIMIT_DELAY_PADDING)
                        }
                        _ => Duration::from_secs(1u64 << attempts.min(6)),
                    };
                    tracing::warn!(
                        item = %item.id,
                        attempt = attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        item: &PlanItem,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, OutcomeKind)> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // A completed record from a previous run short-circuits the item
        // entirely, as long as the file is still there.
        if let Some(record) = self
            .store
            .as_ref()
            .and_then(|s| s.get_download(&item.id))
            .filter(|r| r.is_completed())
        {
            let path = PathBuf::from(&record.output_path);
            if path.exists() {
                tracing::debug!(item = %item.id, "Already downloaded in a prior run");
                return Ok((path, OutcomeKind::AlreadyDownloaded));
            }
        }

        let song = match &item.audio_url {
            Some(url) => self.audio_song(item, url, cancel).await?,
            None => self.service_song(item, cancel).await?,
        };

        let output_path = template::render_output_path(&self.output_template, &song, self.format);
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        if self.file_cache.exists(&output_path) {
            match self.overwrite {
                OverwriteMode::Skip => {
                    tracing::info!(path = %output_path.display(), "File exists, skipping download");
                    return Ok((output_path, OutcomeKind::SkippedExisting));
                }
                OverwriteMode::Metadata => {
                    tracing::info!(path = %output_path.display(), "File exists, refreshing tags");
                    self.tagger.embed(&output_path, &song).await?;
                    return Ok((output_path, OutcomeKind::SkippedExisting));
                }
                OverwriteMode::Overwrite => {}
            }
        }

        let audio_url = match &item.audio_url {
            Some(url) => url.clone(),
            None => {
                let query = format!("{} - {}", song.artist, song.title);
                self.audio
                    .search(&query, cancel)
                    .await?
                    .ok_or(Error::AudioNotFound(query))?
            }
        };

        let actual_path = self.audio.download(&audio_url, &output_path, cancel).await?;

        if let Err(e) = self.tagger.embed(&actual_path, &song).await {
            // The audio is on disk; a tagging failure is not worth losing it.
            tracing::warn!(path = %actual_path.display(), error = %e, "Embed failed");
        }

        if !actual_path.exists() {
            return Err(Error::download(format!(
                "verification failed, {} does not exist",
                actual_path.display()
            )));
        }
        self.file_cache.invalidate(&output_path);
        self.file_cache.invalidate(&actual_path);

        Ok((actual_path, OutcomeKind::Downloaded))
    }

    /// Metadata-service path: track lookup → album lookup → Song.
    async fn service_song(&self, item: &PlanItem, cancel: &CancellationToken) -> Result<Song> {
        let url = item
            .source_url
            .as_deref()
            .ok_or_else(|| Error::MissingMetadata(format!("item {} has no source URL", item.id)))?;
        let track = self.spotify.get_track(url, cancel).await?;
        let album_id = track.album_id.clone().ok_or_else(|| {
            Error::MissingMetadata(format!("track {} has no album", track.id))
        })?;
        let album = self.spotify.get_album(&album_id, cancel).await?;

        Ok(Song {
            title: track.name.clone(),
            artist: track.primary_artist().to_string(),
            album: album.name.clone(),
            album_artist: album.primary_artist().to_string(),
            track_number: track.track_number,
            disc_number: track.disc_number,
            year: adapter::extract_year(&album.release_date),
            date: album.release_date.clone(),
            isrc: track.isrc.clone(),
            cover_url: album.cover_url.clone(),
            total_tracks: Some(album.total_tracks),
            explicit: track.explicit,
            duration_secs: track.duration_secs,
        })
    }

    /// Direct-audio path: video metadata → Song, with optional enhancement.
    async fn audio_song(
        &self,
        item: &PlanItem,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Song> {
        let video: VideoMetadata = match item
            .metadata
            .get(meta_keys::YOUTUBE_METADATA)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            Some(video) => video,
            None => self.audio.video_metadata(url, cancel).await?,
        };

        let uploader = video.uploader.clone().unwrap_or_default();
        let mut song = Song {
            title: video.title.clone(),
            artist: uploader.clone(),
            album: DEFAULT_AUDIO_ALBUM.to_string(),
            album_artist: uploader,
            track_number: 0,
            disc_number: 1,
            year: video
                .upload_date
                .as_deref()
                .map(upload_date_year)
                .unwrap_or(0),
            date: video.upload_date.clone().unwrap_or_default(),
            isrc: None,
            cover_url: video.thumbnail.clone(),
            total_tracks: None,
            explicit: false,
            duration_secs: video.duration_secs.unwrap_or(0),
        };

        if let Some(enhancement) = item
            .metadata
            .get(meta_keys::SPOTIFY_ENHANCEMENT)
            .and_then(|v| serde_json::from_value::<TrackDetails>(v.clone()).ok())
        {
            apply_enhancement(&mut song, &enhancement);
        }
        Ok(song)
    }

    fn record_success(&self, item: &PlanItem, path: &Path) {
        if let Some(store) = &self.store {
            let size = std::fs::metadata(path).map(|m| m.len()).ok();
            store.put_download(&item.id, DownloadRecord::completed(path.display().to_string(), size));
        }
    }

    fn record_failure(&self, item: &PlanItem, error: &Error) {
        if let Some(store) = &self.store {
            store.put_download(
                &item.id,
                DownloadRecord {
                    output_path: String::new(),
                    status: "failed".to_string(),
                    downloaded_at: None,
                    last_attempt: Some(chrono::Utc::now()),
                    file_size_bytes: None,
                    error: Some(error.to_string()),
                    checksum: None,
                },
            );
        }
    }
}

/// Merge an enhancement record into a direct-audio song.
///
/// Album and artist are replaced only while the defaults (uploader name,
/// "YouTube" album) are still in place; numbering, dates, ISRC, cover,
/// explicit flag, and track totals always win when provided.
fn apply_enhancement(song: &mut Song, enhancement: &TrackDetails) {
    if song.album == DEFAULT_AUDIO_ALBUM {
        if let Some(album) = &enhancement.album_name {
            song.album = album.clone();
        }
        let artist = enhancement.primary_artist();
        if !artist.is_empty() {
            song.artist = artist.to_string();
            song.album_artist = enhancement
                .album_artist
                .clone()
                .unwrap_or_else(|| artist.to_string());
        }
    }
    if enhancement.track_number > 0 {
        song.track_number = enhancement.track_number;
    }
    if enhancement.disc_number > 0 {
        song.disc_number = enhancement.disc_number;
    }
    if let Some(date) = &enhancement.release_date {
        song.date = date.clone();
        song.year = adapter::extract_year(date);
    }
    if enhancement.isrc.is_some() {
        song.isrc = enhancement.isrc.clone();
    }
    if enhancement.cover_url.is_some() {
        song.cover_url = enhancement.cover_url.clone();
    }
    if enhancement.total_tracks.is_some() {
        song.total_tracks = enhancement.total_tracks;
    }
    song.explicit = enhancement.explicit;
}

/// `YYYYMMDD` → year, 0 when unparseable.
fn upload_date_year(date: &str) -> i32 {
    if date.len() >= 4 {
        date[..4].parse().unwrap_or(0)
    } else {
        0
    }
}
