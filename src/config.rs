//! Configuration system using TOML files.
//!
//! The config file is declarative and versioned: it carries the download
//! settings, cache and rate-limit tiers, feature flags, and the user
//! manifest (songs / albums / playlists / artists to acquire).
//!
//! Unlike UI-style settings, an invalid config here is fatal: the engine
//! refuses to run rather than guessing, so [`load`] returns an error
//! instead of falling back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The config schema version this build understands.
pub const CONFIG_VERSION: &str = "1.2";

/// Audio origins the engine knows how to search.
pub const KNOWN_PROVIDERS: &[&str] = &["youtube-music", "youtube", "soundcloud"];

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version; must match [`CONFIG_VERSION`]
    pub version: String,

    /// Download behavior and credentials
    pub download: DownloadConfig,

    /// In-memory cache tiers
    pub cache: CacheConfig,

    /// Per-origin rate limit windows
    pub rate_limits: RateLimitsConfig,

    /// Pipeline stage toggles
    pub features: FeaturesConfig,

    /// History/snapshot settings
    pub history: HistoryConfig,

    /// Individual track sources
    pub songs: SourceList,

    /// Album sources
    pub albums: SourceList,

    /// Playlist sources
    pub playlists: SourceList,

    /// Artist sources
    pub artists: SourceList,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            download: DownloadConfig::default(),
            cache: CacheConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            features: FeaturesConfig::default(),
            history: HistoryConfig::default(),
            songs: SourceList::default(),
            albums: SourceList::default(),
            playlists: SourceList::default(),
            artists: SourceList::default(),
        }
    }
}

/// Download behavior and credentials.
///
/// Credentials come from the config file only, never the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Metadata-service application ID
    pub client_id: String,

    /// Metadata-service application secret
    pub client_secret: String,

    /// Concurrent download workers (1-16)
    pub threads: usize,

    /// Per-item retry attempts beyond the first
    pub max_retries: u32,

    /// Target audio format
    pub format: AudioFormat,

    /// Target bitrate passed to the audio fetcher (e.g. "192K")
    pub bitrate: String,

    /// Output path template; must contain `{title}`
    pub output: String,

    /// Audio origins to search, in preference order
    pub audio_providers: Vec<String>,

    /// Behavior when the output file already exists
    pub overwrite: OverwriteMode,

    /// When false, a container with any failed child is marked failed
    pub allow_partial_containers: bool,

    /// Where the plan file is persisted
    pub plan_path: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            threads: 4,
            max_retries: 3,
            format: AudioFormat::Mp3,
            bitrate: "192K".to_string(),
            output: "music/{artist}/{album}/{track-number:02} - {title}.{output-ext}".to_string(),
            audio_providers: vec!["youtube-music".to_string(), "youtube".to_string()],
            overwrite: OverwriteMode::Skip,
            allow_partial_containers: true,
            plan_path: PathBuf::from("plan.json"),
        }
    }
}

/// Target audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    M4a,
    Opus,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::M4a => "m4a",
            Self::Opus => "opus",
        }
    }
}

/// Behavior when the output path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Keep the existing file and mark the item done
    Skip,
    /// Re-download over the existing file
    Overwrite,
    /// Keep the audio but re-embed tags into the existing file
    Metadata,
}

/// In-memory cache tier sizes and TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Metadata-service entries
    pub metadata_max_size: usize,
    pub metadata_ttl_seconds: u64,

    /// Audio search / video metadata entries
    pub audio_max_size: usize,
    pub audio_ttl_seconds: u64,

    /// File-existence entries in the downloader
    pub file_exists_max_size: usize,

    /// Background expired-entry sweep interval; 0 disables the sweeper
    pub sweep_interval_seconds: u64,

    /// Directory for the cross-run JSON caches
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_max_size: 512,
            metadata_ttl_seconds: 3600,
            audio_max_size: 512,
            audio_ttl_seconds: 86_400,
            file_exists_max_size: 1024,
            sweep_interval_seconds: 300,
            directory: PathBuf::from(".cache"),
        }
    }
}

/// One sliding-window admission rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub enabled: bool,
    pub requests: u32,
    pub window_seconds: f64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 10,
            window_seconds: 1.0,
        }
    }
}

/// Rate limits per origin plus an overall download ceiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub spotify: RateLimit,
    pub youtube: RateLimit,
    pub youtube_music: RateLimit,
    pub soundcloud: RateLimit,
    pub download: RateLimit,
}

/// Pipeline stage toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub generate_plan: bool,
    pub optimize_plan: bool,
    pub execute_plan: bool,
    pub persist_plan: bool,
    pub status_reporting: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            generate_plan: true,
            optimize_plan: true,
            execute_plan: true,
            persist_plan: true,
            status_reporting: true,
        }
    }
}

/// History/snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory for run history and the activity log
    pub directory: PathBuf,

    /// Seconds between progress snapshots; must be > 0
    pub snapshot_interval_seconds: u64,

    /// Run files kept on disk; 0 keeps everything
    pub retention: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("history"),
            snapshot_interval_seconds: 30,
            retention: 50,
        }
    }
}

// ============================================================================
// Manifest sources
// ============================================================================

/// One manifest source: a display name, its URL, and playlist options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub create_m3u: bool,
}

/// A list of manifest sources.
///
/// Accepts all the shapes users actually write:
/// - a `name = "url"` table,
/// - a list of single-entry tables,
/// - a list of bare URL strings,
/// - a list of `{ name, url, create_m3u }` records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceList(pub Vec<SourceEntry>);

impl SourceList {
    pub fn entries(&self) -> &[SourceEntry] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'de> Deserialize<'de> for SourceList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Map(BTreeMap<String, String>),
            List(Vec<ItemRepr>),
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ItemRepr {
            Url(String),
            Record {
                url: String,
                #[serde(default)]
                name: Option<String>,
                #[serde(default)]
                create_m3u: Option<bool>,
            },
            Single(BTreeMap<String, String>),
        }

        let repr = Repr::deserialize(deserializer)?;
        let entries = match repr {
            Repr::Map(map) => map
                .into_iter()
                .map(|(name, url)| SourceEntry {
                    name,
                    url,
                    create_m3u: false,
                })
                .collect(),
            Repr::List(items) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        ItemRepr::Url(url) => entries.push(SourceEntry {
                            name: name_from_url(&url),
                            url,
                            create_m3u: false,
                        }),
                        ItemRepr::Record {
                            url,
                            name,
                            create_m3u,
                        } => entries.push(SourceEntry {
                            name: name.unwrap_or_else(|| name_from_url(&url)),
                            url,
                            create_m3u: create_m3u.unwrap_or(false),
                        }),
                        ItemRepr::Single(map) => {
                            for (name, url) in map {
                                entries.push(SourceEntry {
                                    name,
                                    url,
                                    create_m3u: false,
                                });
                            }
                        }
                    }
                }
                entries
            }
        };
        Ok(SourceList(entries))
    }
}

/// Derive a placeholder name from a bare URL (last non-query path segment).
fn name_from_url(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}

// ============================================================================
// Operations
// ============================================================================

impl Config {
    /// Load and validate configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save configuration to disk atomically (write to temp, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize config: {}", e)))?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &contents)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Validate invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(Error::config(format!(
                "unsupported config version {:?} (expected {:?})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.download.client_id.trim().is_empty() {
            return Err(Error::config("download.client_id must not be empty"));
        }
        if self.download.client_secret.trim().is_empty() {
            return Err(Error::config("download.client_secret must not be empty"));
        }
        if !(1..=16).contains(&self.download.threads) {
            return Err(Error::config(format!(
                "download.threads must be 1-16, got {}",
                self.download.threads
            )));
        }
        if !self.download.output.contains("{title}") {
            return Err(Error::config(
                "download.output template must contain {title}",
            ));
        }
        if self.download.audio_providers.is_empty() {
            return Err(Error::config("download.audio_providers must not be empty"));
        }
        for provider in &self.download.audio_providers {
            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                return Err(Error::config(format!(
                    "unknown audio provider {:?} (known: {})",
                    provider,
                    KNOWN_PROVIDERS.join(", ")
                )));
            }
        }
        if self.history.snapshot_interval_seconds == 0 {
            return Err(Error::config(
                "history.snapshot_interval_seconds must be > 0",
            ));
        }
        Ok(())
    }

    /// Identity hash over the canonical config bytes.
    ///
    /// Persisted in the plan; a plan whose hash differs from the running
    /// config is considered stale.
    pub fn hash(&self) -> String {
        // JSON serialization is canonical here: field order follows the
        // struct definitions.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        crate::hashing::short_hash(&bytes)
    }

    /// Whether any source in the manifest is present.
    pub fn has_sources(&self) -> bool {
        !(self.songs.is_empty()
            && self.albums.is_empty()
            && self.playlists.is_empty()
            && self.artists.is_empty())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.download.client_id = "id".to_string();
        config.download.client_secret = "secret".to_string();
        config
    }

    #[test]
    fn test_default_config_roundtrip() {
        let config = valid_config();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.download.threads, 4);
        assert_eq!(parsed.download.format, AudioFormat::Mp3);
        assert_eq!(parsed.version, CONFIG_VERSION);
    }

    #[test]
    fn test_validate_rejects_empty_credentials() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threads() {
        let mut config = valid_config();
        config.download.threads = 0;
        assert!(config.validate().is_err());
        config.download.threads = 17;
        assert!(config.validate().is_err());
        config.download.threads = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_title_placeholder() {
        let mut config = valid_config();
        config.download.output = "music/{artist}.mp3".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = valid_config();
        config.download.audio_providers = vec!["napster".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_hash_is_stable_and_sensitive() {
        let config = valid_config();
        assert_eq!(config.hash(), config.hash());
        assert_eq!(config.hash().len(), 16);

        let mut changed = config.clone();
        changed.download.threads = 8;
        assert_ne!(config.hash(), changed.hash());
    }

    #[test]
    fn test_sources_as_map() {
        let toml = r#"
[songs]
"My Song" = "https://open.spotify.com/track/abc"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.songs.len(), 1);
        assert_eq!(config.songs.entries()[0].name, "My Song");
    }

    #[test]
    fn test_sources_as_bare_urls() {
        let toml = r#"
songs = ["https://open.spotify.com/track/abc123"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.songs.entries()[0].url, "https://open.spotify.com/track/abc123");
        assert_eq!(config.songs.entries()[0].name, "abc123");
    }

    #[test]
    fn test_sources_as_records_with_m3u_flag() {
        let toml = r#"
[[playlists]]
name = "Workout"
url = "https://open.spotify.com/playlist/xyz"
create_m3u = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let entry = &config.playlists.entries()[0];
        assert_eq!(entry.name, "Workout");
        assert!(entry.create_m3u);
    }

    #[test]
    fn test_sources_as_singleton_maps() {
        let toml = r#"
albums = [{ "Abbey Road" = "https://open.spotify.com/album/ar1" }]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let entry = &config.albums.entries()[0];
        assert_eq!(entry.name, "Abbey Road");
        assert_eq!(entry.url, "https://open.spotify.com/album/ar1");
    }

    #[test]
    fn test_atomic_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = valid_config();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.hash(), config.hash());
    }
}
