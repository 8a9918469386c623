//! Metadata-service HTTP client.
//!
//! Authenticates with the client-credentials flow and exposes the raw Web
//! API endpoints behind [`MetadataFetcher`]. Rate limiting and caching are
//! NOT handled here; that is the facade's job.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::dto;
use super::MetadataFetcher;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("music-courier/", env!("CARGO_PKG_VERSION"));

const DEFAULT_BASE_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh the app token this long before it actually expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Default Retry-After when a 429 omits the header, in seconds.
const DEFAULT_RETRY_AFTER: f64 = 1.0;

struct AppToken {
    access_token: String,
    expires_at: Instant,
}

/// Client-credentials HTTP fetcher for the metadata service.
pub struct SpotifyApi {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AppToken>>,
}

impl SpotifyApi {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::with_urls(client_id, client_secret, DEFAULT_BASE_URL, DEFAULT_TOKEN_URL)
    }

    /// Construct against custom endpoints (used by tests).
    pub fn with_urls(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        }
    }

    /// Current bearer token, refreshing through the client-credentials flow
    /// when absent or about to expire.
    async fn bearer(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::upstream(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "token request rejected: HTTP {}",
                response.status()
            )));
        }

        let token: dto::TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("token response parse failed: {}", e)))?;

        let access_token = token.access_token.clone();
        *guard = Some(AppToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    /// GET a JSON document, classifying rate limits and failures.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let seconds = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(Error::RateLimited {
                seconds,
                origin: "spotify".to_string(),
            });
        }

        if !status.is_success() {
            if let Ok(api_error) = response.json::<dto::ApiError>().await {
                return Err(Error::upstream(format!(
                    "HTTP {}: {}",
                    api_error.error.status, api_error.error.message
                )));
            }
            return Err(Error::upstream(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::upstream(format!("response parse failed: {}", e)))
    }
}

#[async_trait]
impl MetadataFetcher for SpotifyApi {
    async fn track(&self, id: &str) -> Result<dto::TrackObject> {
        self.get_json(&format!("{}/tracks/{}", self.base_url, id))
            .await
    }

    async fn album(&self, id: &str) -> Result<dto::AlbumObject> {
        self.get_json(&format!("{}/albums/{}", self.base_url, id))
            .await
    }

    async fn playlist(&self, id: &str) -> Result<dto::PlaylistObject> {
        self.get_json(&format!("{}/playlists/{}", self.base_url, id))
            .await
    }

    async fn artist(&self, id: &str) -> Result<dto::ArtistObject> {
        self.get_json(&format!("{}/artists/{}", self.base_url, id))
            .await
    }

    async fn artist_albums(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::Paging<dto::AlbumSummaryObject>> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => format!(
                "{}/artists/{}/albums?include_groups=album,single&limit=50",
                self.base_url, id
            ),
        };
        self.get_json(&url).await
    }

    async fn playlist_tracks(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::Paging<dto::PlaylistTrackObject>> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => format!("{}/playlists/{}/tracks?limit=100", self.base_url, id),
        };
        self.get_json(&url).await
    }

    async fn search_tracks(&self, query: &str) -> Result<dto::Paging<dto::TrackObject>> {
        let url = format!(
            "{}/search?type=track&limit=5&q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response: dto::SearchResponse = self.get_json(&url).await?;
        Ok(response.tracks.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_format() {
        assert!(USER_AGENT.starts_with("music-courier/"));
    }

    #[test]
    fn test_construction_with_custom_urls() {
        let api = SpotifyApi::with_urls("id", "secret", "http://localhost:9", "http://localhost:9/token");
        assert_eq!(api.base_url, "http://localhost:9");
        assert_eq!(api.token_url, "http://localhost:9/token");
    }
}
