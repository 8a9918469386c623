//! Audio acquisition.
//!
//! [`AudioProvider`] is the cached, per-origin rate-limited facade the
//! downloader talks to. The actual work (searching an origin, pulling a
//! stream to disk, reading video/playlist metadata) is done by an
//! [`AudioFetcher`] implementation; production uses the `yt-dlp` child
//! process driver in [`ytdlp`], tests use a scripted stub.

mod provider;
pub mod ytdlp;

pub use provider::AudioProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::AudioFormat;
use crate::error::Result;

/// A specific audio source. Each origin gets its own rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioOrigin {
    YoutubeMusic,
    Youtube,
    Soundcloud,
}

impl AudioOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YoutubeMusic => "youtube-music",
            Self::Youtube => "youtube",
            Self::Soundcloud => "soundcloud",
        }
    }

    /// Parse a config-file provider name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "youtube-music" => Some(Self::YoutubeMusic),
            "youtube" => Some(Self::Youtube),
            "soundcloud" => Some(Self::Soundcloud),
            _ => None,
        }
    }

    /// Classify a direct URL into the origin serving it.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.contains("music.youtube.com") {
            Some(Self::YoutubeMusic)
        } else if url.contains("youtube.com") || url.contains("youtu.be") {
            Some(Self::Youtube)
        } else if url.contains("soundcloud.com") {
            Some(Self::Soundcloud)
        } else {
            None
        }
    }
}

/// Metadata for a single video/stream, as reported by the fetcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration_secs: Option<u32>,
    pub webpage_url: String,
    pub thumbnail: Option<String>,
    /// `YYYYMMDD` as reported upstream
    pub upload_date: Option<String>,
}

/// A playlist: container metadata plus its member videos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub entries: Vec<VideoMetadata>,
}

/// Raw access to audio origins.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Search one origin; `Ok(None)` means the origin had no result.
    async fn search(&self, origin: AudioOrigin, query: &str) -> Result<Option<String>>;

    /// Fetch the stream at `url` to (approximately) `output`; the fetcher
    /// may rewrite the extension while transcoding.
    async fn download(
        &self,
        url: &str,
        output: &Path,
        format: AudioFormat,
        bitrate: &str,
    ) -> Result<()>;

    async fn video_metadata(&self, url: &str) -> Result<VideoMetadata>;

    async fn playlist_info(&self, url: &str) -> Result<PlaylistInfo>;
}

/// Fetcher used when no yt-dlp binary could be located.
///
/// Lets metadata-only workflows (plan generation for service sources)
/// proceed; any audio operation fails with an actionable message.
pub struct UnavailableFetcher;

#[async_trait]
impl AudioFetcher for UnavailableFetcher {
    async fn search(&self, _origin: AudioOrigin, _query: &str) -> Result<Option<String>> {
        Err(unavailable())
    }

    async fn download(
        &self,
        _url: &str,
        _output: &Path,
        _format: AudioFormat,
        _bitrate: &str,
    ) -> Result<()> {
        Err(unavailable())
    }

    async fn video_metadata(&self, _url: &str) -> Result<VideoMetadata> {
        Err(unavailable())
    }

    async fn playlist_info(&self, _url: &str) -> Result<PlaylistInfo> {
        Err(unavailable())
    }
}

fn unavailable() -> crate::error::Error {
    crate::error::Error::download(
        "yt-dlp not found; install it (e.g. `pip install yt-dlp`) and retry",
    )
}

/// Whether a URL points at a known audio origin (rather than the metadata
/// service).
pub fn is_audio_url(url: &str) -> bool {
    AudioOrigin::from_url(url).is_some()
}

/// Whether an audio-origin URL names a playlist rather than a single video.
pub fn is_playlist_url(url: &str) -> bool {
    url.contains("list=") || url.contains("/sets/")
}
