//! Application-wide error types.
//!
//! One unified error hierarchy for the engine. Library modules return
//! [`Error`] via `thiserror`, while CLI/main uses `anyhow` for convenient
//! error propagation.
//!
//! Retry policy lives here as well: [`Error::is_retriable`] decides whether
//! the downloader's backoff loop may attempt an item again, and
//! [`Error::retry_after`] surfaces a server-mandated delay.

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration; surfaced at load, never retried
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream replied with a rate-limit response
    #[error("Rate limited by {origin}, retry after {seconds}s")]
    RateLimited { seconds: f64, origin: String },

    /// Any other metadata-service failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Search returned nothing across all audio origins
    #[error("No audio found for \"{0}\"")]
    AudioNotFound(String),

    /// The audio fetch itself failed
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Tag/cover embedding failed (logged, does not fail the item)
    #[error("Tag embedding failed for {path}: {message}")]
    Embed { path: std::path::PathBuf, message: String },

    /// An item is missing data it cannot proceed without (e.g. a track
    /// with no album); terminal for the item
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    /// Cancellation; propagates without retry
    #[error("Operation cancelled")]
    Cancelled,

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Create a download error.
    pub fn download(message: impl Into<String>) -> Self {
        Self::DownloadFailed(message.into())
    }

    /// Create an embed error.
    pub fn embed(path: impl Into<std::path::PathBuf>, message: impl Into<String>) -> Self {
        Self::Embed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the downloader's backoff loop may retry after this error.
    ///
    /// IO errors are retriable exactly once; the retry loop enforces that
    /// separately via [`Error::is_io`].
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Upstream(_) | Self::DownloadFailed(_) | Self::Io(_)
        )
    }

    /// Server-mandated delay in seconds, if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { seconds, .. } => Some(*seconds),
            _ => None,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
