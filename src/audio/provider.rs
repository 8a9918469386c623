//! Cached, per-origin rate-limited facade over the audio fetcher.
//!
//! Searches walk the configured origins in declared order and stop at the
//! first hit. Empty outcomes are cached negatively so a track that no
//! origin carries doesn't trigger the same fan-out on every retry; the
//! negative entry is a distinct variant, not an empty string, so a cached
//! miss can never be confused with a cached hit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{AudioFetcher, AudioOrigin, PlaylistInfo, VideoMetadata};
use crate::cache::store::StateStore;
use crate::cache::TtlCache;
use crate::config::{AudioFormat, Config};
use crate::error::{Error, Result};
use crate::ratelimit::{RateLimitTracker, SlidingWindowLimiter};
use crate::spotify::adapter::normalize_query;

/// Result of a search, including the remembered absence of one.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(String),
    NotFound,
}

/// Extensions tried when the fetcher rewrote the output extension.
const ALTERNATE_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "flac", "ogg", "webm", "wav"];

pub struct AudioProvider {
    fetcher: Arc<dyn AudioFetcher>,
    origins: Vec<AudioOrigin>,
    limiters: HashMap<AudioOrigin, SlidingWindowLimiter>,
    general_limiter: Option<Arc<SlidingWindowLimiter>>,
    searches: TtlCache<String, SearchOutcome>,
    videos: TtlCache<String, VideoMetadata>,
    tracker: Arc<RateLimitTracker>,
    store: Option<Arc<StateStore>>,
    format: AudioFormat,
    bitrate: String,
}

impl AudioProvider {
    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        config: &Config,
        tracker: Arc<RateLimitTracker>,
        general_limiter: Option<Arc<SlidingWindowLimiter>>,
        store: Option<Arc<StateStore>>,
    ) -> Self {
        let origins: Vec<AudioOrigin> = config
            .download
            .audio_providers
            .iter()
            .filter_map(|name| AudioOrigin::from_name(name))
            .collect();
        let limiters = HashMap::from([
            (
                AudioOrigin::YoutubeMusic,
                SlidingWindowLimiter::from_config(&config.rate_limits.youtube_music),
            ),
            (
                AudioOrigin::Youtube,
                SlidingWindowLimiter::from_config(&config.rate_limits.youtube),
            ),
            (
                AudioOrigin::Soundcloud,
                SlidingWindowLimiter::from_config(&config.rate_limits.soundcloud),
            ),
        ]);
        let ttl = Duration::from_secs(config.cache.audio_ttl_seconds);
        Self {
            fetcher,
            origins,
            limiters,
            general_limiter,
            searches: TtlCache::new(config.cache.audio_max_size, ttl),
            videos: TtlCache::new(config.cache.audio_max_size, ttl),
            tracker,
            store,
            format: config.download.format,
            bitrate: config.download.bitrate.clone(),
        }
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    /// Drop expired search and metadata entries; returns the count.
    pub fn evict_expired(&self) -> usize {
        self.searches.evict_expired() + self.videos.evict_expired()
    }

    /// Search the configured origins for `query`, first hit wins.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let key = format!("audio_search:{}", normalize_query(query));
        if let Some(outcome) = self.searches.get(&key) {
            return Ok(match outcome {
                SearchOutcome::Found(url) => Some(url),
                SearchOutcome::NotFound => None,
            });
        }
        if let Some(persisted) = self.store.as_ref().and_then(|s| s.get_audio(&key)) {
            let outcome = match persisted.as_str() {
                Some(url) => SearchOutcome::Found(url.to_string()),
                None => SearchOutcome::NotFound,
            };
            self.searches.insert(key, outcome.clone());
            return Ok(match outcome {
                SearchOutcome::Found(url) => Some(url),
                SearchOutcome::NotFound => None,
            });
        }

        for origin in &self.origins {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.admit(*origin, cancel).await?;
            match self.fetcher.search(*origin, query).await {
                Ok(Some(url)) => {
                    self.tracker.clear();
                    self.searches.insert(key.clone(), SearchOutcome::Found(url.clone()));
                    if let Some(store) = &self.store {
                        store.put_audio(key, serde_json::Value::String(url.clone()));
                    }
                    return Ok(Some(url));
                }
                Ok(None) => {
                    self.tracker.clear();
                    tracing::debug!(origin = origin.as_str(), query, "Origin had no result");
                }
                Err(Error::RateLimited { seconds, origin: o }) => {
                    self.tracker.update(seconds);
                    return Err(Error::RateLimited { seconds, origin: o });
                }
                Err(e) => {
                    tracing::warn!(origin = origin.as_str(), error = %e, "Search failed, trying next origin");
                }
            }
        }

        // Remember the miss so retries don't re-query every origin.
        self.searches.insert(key.clone(), SearchOutcome::NotFound);
        if let Some(store) = &self.store {
            store.put_audio(key, serde_json::Value::Null);
        }
        Ok(None)
    }

    /// Download `url` to (approximately) `output_path`.
    ///
    /// Returns the path of the file the fetcher actually produced, which
    /// may differ in extension after a transcode.
    pub async fn download(
        &self,
        url: &str,
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let origin = AudioOrigin::from_url(url).unwrap_or(AudioOrigin::Youtube);
        self.admit(origin, cancel).await?;

        match self
            .fetcher
            .download(url, output_path, self.format, &self.bitrate)
            .await
        {
            Ok(()) => self.tracker.clear(),
            Err(Error::RateLimited { seconds, origin }) => {
                self.tracker.update(seconds);
                return Err(Error::RateLimited { seconds, origin });
            }
            Err(e) => return Err(e),
        }

        locate_output(output_path)
    }

    /// Metadata for a single video, cached by URL.
    pub async fn video_metadata(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<VideoMetadata> {
        let key = format!("video:{}", url);
        if let Some(hit) = self.videos.get(&key) {
            return Ok(hit);
        }
        if let Some(persisted) = self
            .store
            .as_ref()
            .and_then(|s| s.get_audio(&key))
            .and_then(|v| serde_json::from_value::<VideoMetadata>(v).ok())
        {
            self.videos.insert(key, persisted.clone());
            return Ok(persisted);
        }

        let origin = AudioOrigin::from_url(url).unwrap_or(AudioOrigin::Youtube);
        self.admit(origin, cancel).await?;
        let video = match self.fetcher.video_metadata(url).await {
            Ok(video) => {
                self.tracker.clear();
                video
            }
            Err(Error::RateLimited { seconds, origin }) => {
                self.tracker.update(seconds);
                return Err(Error::RateLimited { seconds, origin });
            }
            Err(e) => return Err(e),
        };
        self.videos.insert(key.clone(), video.clone());
        if let Some(store) = &self.store
            && let Ok(json) = serde_json::to_value(&video)
        {
            store.put_audio(key, json);
        }
        Ok(video)
    }

    /// Container metadata plus entries for a playlist URL.
    pub async fn playlist_info(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaylistInfo> {
        let origin = AudioOrigin::from_url(url).unwrap_or(AudioOrigin::Youtube);
        self.admit(origin, cancel).await?;
        match self.fetcher.playlist_info(url).await {
            Ok(info) => {
                self.tracker.clear();
                Ok(info)
            }
            Err(Error::RateLimited { seconds, origin }) => {
                self.tracker.update(seconds);
                Err(Error::RateLimited { seconds, origin })
            }
            Err(e) => Err(e),
        }
    }

    async fn admit(&self, origin: AudioOrigin, cancel: &CancellationToken) -> Result<()> {
        if let Some(general) = &self.general_limiter {
            general.wait_if_needed(cancel).await?;
        }
        if let Some(limiter) = self.limiters.get(&origin) {
            limiter.wait_if_needed(cancel).await?;
        }
        Ok(())
    }
}

/// Find the file the fetcher actually produced.
///
/// Tries the requested path, then alternate extensions, then any sibling
/// sharing the same basename.
fn locate_output(requested: &Path) -> Result<PathBuf> {
    if requested.exists() {
        return Ok(requested.to_path_buf());
    }
    for ext in ALTERNATE_EXTENSIONS {
        let candidate = requested.with_extension(ext);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    let stem = requested.file_stem();
    if let (Some(stem), Some(parent)) = (stem, requested.parent())
        && let Ok(entries) = std::fs::read_dir(parent)
    {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.file_stem() == Some(stem) {
                return Ok(path);
            }
        }
    }
    Err(Error::download(format!(
        "fetcher produced no file near {}",
        requested.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_config, StubAudioFetcher};
    use std::sync::atomic::Ordering;

    fn provider_with(fetcher: StubAudioFetcher) -> AudioProvider {
        AudioProvider::new(
            Arc::new(fetcher),
            &test_config(),
            Arc::new(RateLimitTracker::new()),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_search_first_origin_wins() {
        let fetcher = StubAudioFetcher::new();
        fetcher.add_search(AudioOrigin::YoutubeMusic, "artist - title", "https://music.youtube.com/watch?v=a");
        fetcher.add_search(AudioOrigin::Youtube, "artist - title", "https://youtube.com/watch?v=b");
        let provider = provider_with(fetcher);

        let url = provider
            .search("Artist - Title", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://music.youtube.com/watch?v=a"));
    }

    #[tokio::test]
    async fn test_search_falls_through_to_later_origin() {
        let fetcher = StubAudioFetcher::new();
        fetcher.add_search(AudioOrigin::Youtube, "artist - title", "https://youtube.com/watch?v=b");
        let provider = provider_with(fetcher);

        let url = provider
            .search("artist - title", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://youtube.com/watch?v=b"));
    }

    #[tokio::test]
    async fn test_search_negative_result_is_cached() {
        let fetcher = StubAudioFetcher::new();
        let counter = fetcher.search_calls.clone();
        let provider = provider_with(fetcher);
        let cancel = CancellationToken::new();

        assert_eq!(provider.search("nothing here", &cancel).await.unwrap(), None);
        let calls_after_first = counter.load(Ordering::SeqCst);
        assert_eq!(provider.search("nothing  HERE", &cancel).await.unwrap(), None);
        assert_eq!(counter.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_search_rate_limit_updates_tracker_and_propagates() {
        let fetcher = StubAudioFetcher::new();
        fetcher.fail_next_search(Error::RateLimited {
            seconds: 9.0,
            origin: "youtube".to_string(),
        });
        let provider = provider_with(fetcher);

        let err = provider
            .search("q", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(9.0));
        assert!(provider.tracker().is_throttled());
    }

    #[tokio::test]
    async fn test_download_locates_rewritten_extension() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubAudioFetcher::new();
        // Fetcher "transcodes" to m4a regardless of the requested name.
        fetcher.set_download_extension("m4a");
        let provider = provider_with(fetcher);

        let requested = dir.path().join("song.mp3");
        let actual = provider
            .download("https://youtube.com/watch?v=a", &requested, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(actual, dir.path().join("song.m4a"));
    }

    #[tokio::test]
    async fn test_video_metadata_is_cached() {
        let fetcher = StubAudioFetcher::new();
        fetcher.add_video(
            "https://youtube.com/watch?v=a",
            VideoMetadata {
                id: "a".to_string(),
                title: "Video".to_string(),
                uploader: Some("Channel".to_string()),
                webpage_url: "https://youtube.com/watch?v=a".to_string(),
                ..Default::default()
            },
        );
        let counter = fetcher.metadata_calls.clone();
        let provider = provider_with(fetcher);
        let cancel = CancellationToken::new();

        let first = provider
            .video_metadata("https://youtube.com/watch?v=a", &cancel)
            .await
            .unwrap();
        let second = provider
            .video_metadata("https://youtube.com/watch?v=a", &cancel)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_locate_output_exact_and_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let exact = dir.path().join("track.mp3");
        std::fs::write(&exact, b"x").unwrap();
        assert_eq!(locate_output(&exact).unwrap(), exact);

        let missing = dir.path().join("other.mp3");
        std::fs::write(dir.path().join("other.opus"), b"x").unwrap();
        assert_eq!(locate_output(&missing).unwrap(), dir.path().join("other.opus"));

        assert!(locate_output(&dir.path().join("absent.mp3")).is_err());
    }
}
