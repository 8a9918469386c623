//! Cross-run persistent state.
//!
//! Three JSON-backed maps under the cache directory survive between runs:
//! metadata lookups (`spotify_cache.json`, 1h TTL), audio search results
//! (`youtube_cache.json`, 24h TTL), and completed downloads
//! (`download_cache.json`, no TTL). Loading filters entries past their
//! TTL; a TTL of zero or below means the entry never expires.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

const SPOTIFY_CACHE_FILE: &str = "spotify_cache.json";
const YOUTUBE_CACHE_FILE: &str = "youtube_cache.json";
const DOWNLOAD_CACHE_FILE: &str = "download_cache.json";

/// Default TTL for persisted metadata entries, in seconds.
pub const METADATA_TTL_SECONDS: i64 = 3600;
/// Default TTL for persisted audio search entries, in seconds.
pub const AUDIO_TTL_SECONDS: i64 = 86_400;

/// One persisted metadata or search entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub metadata: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl CachedEntry {
    pub fn new(metadata: serde_json::Value, ttl_seconds: i64) -> Self {
        Self {
            metadata,
            cached_at: Utc::now(),
            ttl_seconds,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl_seconds <= 0 {
            return false;
        }
        now >= self.cached_at + chrono::Duration::seconds(self.ttl_seconds)
    }
}

/// Outcome of a completed (or attempted) download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub output_path: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl DownloadRecord {
    pub fn completed(output_path: impl Into<String>, file_size_bytes: Option<u64>) -> Self {
        Self {
            output_path: output_path.into(),
            status: "completed".to_string(),
            downloaded_at: Some(Utc::now()),
            last_attempt: Some(Utc::now()),
            file_size_bytes,
            error: None,
            checksum: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// JSON-backed caches shared across runs.
pub struct StateStore {
    directory: PathBuf,
    spotify: RwLock<HashMap<String, CachedEntry>>,
    youtube: RwLock<HashMap<String, CachedEntry>>,
    downloads: RwLock<HashMap<String, DownloadRecord>>,
}

impl StateStore {
    /// Load the store from `directory`, dropping expired entries.
    ///
    /// Missing or unreadable files start empty; persistence is an
    /// optimization, not a source of truth.
    pub fn load(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let now = Utc::now();
        let spotify = load_entries(&directory.join(SPOTIFY_CACHE_FILE), now);
        let youtube = load_entries(&directory.join(YOUTUBE_CACHE_FILE), now);
        let downloads: HashMap<String, DownloadRecord> =
            load_map(&directory.join(DOWNLOAD_CACHE_FILE));
        tracing::debug!(
            spotify = spotify.len(),
            youtube = youtube.len(),
            downloads = downloads.len(),
            "Loaded persistent state"
        );
        Self {
            directory,
            spotify: RwLock::new(spotify),
            youtube: RwLock::new(youtube),
            downloads: RwLock::new(downloads),
        }
    }

    /// Persist all three maps as pretty-printed JSON.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        save_map(
            &self.directory.join(SPOTIFY_CACHE_FILE),
            &*self.spotify.read(),
        )?;
        save_map(
            &self.directory.join(YOUTUBE_CACHE_FILE),
            &*self.youtube.read(),
        )?;
        save_map(
            &self.directory.join(DOWNLOAD_CACHE_FILE),
            &*self.downloads.read(),
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        let guard = self.spotify.read();
        let entry = guard.get(key)?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        Some(entry.metadata.clone())
    }

    pub fn put_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.spotify
            .write()
            .insert(key.into(), CachedEntry::new(value, METADATA_TTL_SECONDS));
    }

    pub fn get_audio(&self, key: &str) -> Option<serde_json::Value> {
        let guard = self.youtube.read();
        let entry = guard.get(key)?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        Some(entry.metadata.clone())
    }

    pub fn put_audio(&self, key: impl Into<String>, value: serde_json::Value) {
        self.youtube
            .write()
            .insert(key.into(), CachedEntry::new(value, AUDIO_TTL_SECONDS));
    }

    pub fn get_download(&self, item_id: &str) -> Option<DownloadRecord> {
        self.downloads.read().get(item_id).cloned()
    }

    pub fn put_download(&self, item_id: impl Into<String>, record: DownloadRecord) {
        self.downloads.write().insert(item_id.into(), record);
    }
}

fn load_entries(path: &Path, now: DateTime<Utc>) -> HashMap<String, CachedEntry> {
    let mut entries: HashMap<String, CachedEntry> = load_map(path);
    entries.retain(|_, entry| !entry.is_expired(now));
    entries
}

fn load_map<T: serde::de::DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&contents) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable cache file");
            HashMap::new()
        }
    }
}

fn save_map<T: Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<()> {
    let json = serde_json::to_string_pretty(map)?;
    std::fs::write(path, json)?;
    Ok(())
}
