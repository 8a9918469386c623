//! Audio fetching via the `yt-dlp` command-line tool.
//!
//! Shelling out to yt-dlp is more reliable than any in-process extractor
//! and works wherever the binary is installed.
//!
//! Install yt-dlp:
//! - Windows: `winget install yt-dlp`
//! - macOS: `brew install yt-dlp`
//! - Linux: `pip install yt-dlp` or your distro package

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{AudioFetcher, AudioOrigin, PlaylistInfo, VideoMetadata};
use crate::config::AudioFormat;
use crate::error::{Error, Result};

/// Common installation paths for yt-dlp on Windows
#[cfg(windows)]
const YTDLP_PATHS: &[&str] = &[
    "yt-dlp", // In PATH
    r"C:\Program Files\yt-dlp\yt-dlp.exe",
    r"C:\ProgramData\chocolatey\bin\yt-dlp.exe",
];

#[cfg(not(windows))]
const YTDLP_PATHS: &[&str] = &[
    "yt-dlp", // In PATH
    "/usr/local/bin/yt-dlp",
    "/usr/bin/yt-dlp",
    "/opt/homebrew/bin/yt-dlp",
];

/// [`AudioFetcher`] backed by the yt-dlp child process.
pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    /// Find the yt-dlp executable, checking common installation paths.
    pub fn locate() -> Option<Self> {
        YTDLP_PATHS
            .iter()
            .find(|&path| {
                std::process::Command::new(path)
                    .arg("--version")
                    .output()
                    .map(|o| o.status.success())
                    .unwrap_or(false)
            })
            .map(|path| Self {
                binary: PathBuf::from(path),
            })
    }

    /// yt-dlp version string (for diagnostics).
    pub fn version(&self) -> Option<String> {
        std::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::download(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Map a yt-dlp failure message onto our error kinds.
///
/// yt-dlp reports origin throttling as plain text, so the 429 family is
/// matched by message.
fn classify_failure(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        Error::RateLimited {
            seconds: 1.0,
            origin: "audio".to_string(),
        }
    } else {
        Error::download(format!("yt-dlp failed: {}", stderr))
    }
}

/// Build the search expression yt-dlp understands for an origin.
fn search_expression(origin: AudioOrigin, query: &str) -> String {
    match origin {
        AudioOrigin::YoutubeMusic => format!(
            "https://music.youtube.com/search?q={}",
            urlencoding::encode(query)
        ),
        AudioOrigin::Youtube => format!("ytsearch1:{}", query),
        AudioOrigin::Soundcloud => format!("scsearch1:{}", query),
    }
}

#[async_trait]
impl AudioFetcher for YtDlpFetcher {
    async fn search(&self, origin: AudioOrigin, query: &str) -> Result<Option<String>> {
        let expr = search_expression(origin, query);
        let stdout = self
            .run(&[
                "--no-warnings",
                "--flat-playlist",
                "--playlist-items",
                "1",
                "--print",
                "webpage_url",
                &expr,
            ])
            .await?;
        let url = stdout.lines().next().unwrap_or("").trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    async fn download(
        &self,
        url: &str,
        output: &Path,
        format: AudioFormat,
        bitrate: &str,
    ) -> Result<()> {
        // yt-dlp picks the real extension during extraction/transcode, so
        // hand it the stem and let the provider locate the produced file.
        let stem = output.with_extension("");
        let template = format!("{}.%(ext)s", stem.display());
        self.run(&[
            "--no-warnings",
            "--no-playlist",
            "-x",
            "--audio-format",
            format.extension(),
            "--audio-quality",
            bitrate,
            "-o",
            &template,
            url,
        ])
        .await?;
        Ok(())
    }

    async fn video_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let stdout = self
            .run(&["--no-warnings", "--no-playlist", "--dump-json", url])
            .await?;
        let record: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| Error::download(format!("unparseable yt-dlp metadata: {}", e)))?;
        parse_video_record(&record)
            .ok_or_else(|| Error::download(format!("no video metadata in yt-dlp output for {}", url)))
    }

    async fn playlist_info(&self, url: &str) -> Result<PlaylistInfo> {
        let stdout = self
            .run(&["--no-warnings", "--flat-playlist", "--dump-json", url])
            .await?;
        parse_playlist_records(url, &stdout)
    }
}

/// Parse one yt-dlp JSON record into video metadata.
///
/// Returns `None` for records that are not videos: playlist containers
/// (`_type == "playlist"`) and rows with no video id.
fn parse_video_record(record: &serde_json::Value) -> Option<VideoMetadata> {
    if record.get("_type").and_then(|v| v.as_str()) == Some("playlist") {
        return None;
    }
    let id = record.get("id")?.as_str()?.to_string();
    if id.is_empty() {
        return None;
    }
    Some(VideoMetadata {
        title: record
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        uploader: record
            .get("uploader")
            .or_else(|| record.get("channel"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        duration_secs: record
            .get("duration")
            .and_then(|v| v.as_f64())
            .map(|d| d.round() as u32),
        webpage_url: record
            .get("webpage_url")
            .or_else(|| record.get("url"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        thumbnail: record
            .get("thumbnail")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        upload_date: record
            .get("upload_date")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        id,
    })
}

/// Parse yt-dlp's line-per-record playlist output.
///
/// The first record may be the playlist container itself; every subsequent
/// record is a member video. Later container records and id-less rows are
/// skipped from the entry list.
fn parse_playlist_records(url: &str, stdout: &str) -> Result<PlaylistInfo> {
    let mut info = PlaylistInfo::default();
    let mut saw_any = false;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| Error::download(format!("unparseable yt-dlp playlist record: {}", e)))?;

        if record.get("_type").and_then(|v| v.as_str()) == Some("playlist") {
            if !saw_any {
                info.id = record
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                info.title = record
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
            }
            saw_any = true;
            continue;
        }
        saw_any = true;
        if let Some(video) = parse_video_record(&record) {
            if info.title.is_empty()
                && let Some(playlist_title) =
                    record.get("playlist_title").and_then(|v| v.as_str())
            {
                info.title = playlist_title.to_string();
            }
            info.entries.push(video);
        }
    }

    if !saw_any {
        return Err(Error::download(format!("empty yt-dlp output for {}", url)));
    }
    if info.title.is_empty() {
        info.title = url.to_string();
    }
    Ok(info)
}
