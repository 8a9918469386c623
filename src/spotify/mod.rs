//! Metadata-service integration.
//!
//! [`MetadataClient`] is the engine's entry point: a cached, rate-limited
//! facade over the service's Web API. The raw HTTP calls live in
//! [`api::SpotifyApi`] behind the [`MetadataFetcher`] trait so tests can
//! swap in a scripted fetcher.
//!
//! These domain types are OUR types; API responses are converted into them
//! by the adapter and nothing downstream sees a wire shape.

pub mod adapter;
pub mod api;
mod client;
pub mod dto;

pub use client::MetadataClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Entity kinds addressable on the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Track,
    Album,
    Playlist,
    Artist,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::Artist => "artist",
        }
    }
}

/// Full track details as the downloader consumes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackDetails {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration_secs: u32,
    pub explicit: bool,
    pub isrc: Option<String>,
    pub release_date: Option<String>,
    pub cover_url: Option<String>,
    pub total_tracks: Option<u32>,
}

impl TrackDetails {
    /// Primary artist, or empty string when the catalog omits one.
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or("")
    }
}

/// An album with its full (adapted) track listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumDetails {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub release_date: String,
    pub cover_url: Option<String>,
    pub total_tracks: u32,
    pub tracks: Vec<TrackDetails>,
}

impl AlbumDetails {
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or("")
    }
}

/// Discography entry for an artist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub id: String,
    pub name: String,
    /// "album", "single", "compilation", or "appears_on"
    pub album_group: String,
    pub total_tracks: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistDetails {
    pub id: String,
    pub name: String,
    pub tracks: Vec<TrackDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistDetails {
    pub id: String,
    pub name: String,
}

/// Raw access to the metadata service.
///
/// Paged methods take the previous page's `next` cursor URL; `None` fetches
/// the first page.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn track(&self, id: &str) -> Result<dto::TrackObject>;
    async fn album(&self, id: &str) -> Result<dto::AlbumObject>;
    async fn playlist(&self, id: &str) -> Result<dto::PlaylistObject>;
    async fn artist(&self, id: &str) -> Result<dto::ArtistObject>;
    async fn artist_albums(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::Paging<dto::AlbumSummaryObject>>;
    async fn playlist_tracks(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::Paging<dto::PlaylistTrackObject>>;
    async fn search_tracks(&self, query: &str) -> Result<dto::Paging<dto::TrackObject>>;
}
