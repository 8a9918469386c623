//! Plan generation: user manifest → dependency-linked work items.
//!
//! Each manifest source expands through cached upstream lookups:
//! artist → albums → tracks, playlist → tracks, album → tracks. Direct
//! audio-origin URLs go through the audio provider's metadata parsers
//! instead, optionally enhanced with a metadata-service search.
//!
//! Generation is cancellable between lookups; a partially generated plan
//! is never persisted here (the caller decides when to save).

use tokio_util::sync::CancellationToken;

use super::{meta_keys, ItemKind, Plan, PlanItem};
use crate::audio::{self, AudioOrigin, AudioProvider, VideoMetadata};
use crate::config::{Config, SourceEntry};
use crate::error::{Error, Result};
use crate::hashing::track_fingerprint;
use crate::spotify::{adapter, EntityKind, MetadataClient, TrackDetails};

pub struct PlanGenerator<'a> {
    spotify: &'a MetadataClient,
    audio: &'a AudioProvider,
    config: &'a Config,
}

impl<'a> PlanGenerator<'a> {
    pub fn new(
        spotify: &'a MetadataClient,
        audio: &'a AudioProvider,
        config: &'a Config,
    ) -> Self {
        Self {
            spotify,
            audio,
            config,
        }
    }

    /// Expand every manifest source into plan items.
    pub async fn generate(&self, cancel: &CancellationToken) -> Result<Plan> {
        let mut plan = Plan::new(self.config.hash());

        for entry in self.config.songs.entries() {
            self.check_cancel(cancel)?;
            self.add_song(&mut plan, entry, cancel).await?;
        }
        for entry in self.config.albums.entries() {
            self.check_cancel(cancel)?;
            self.add_album(&mut plan, entry, cancel).await?;
        }
        for entry in self.config.playlists.entries() {
            self.check_cancel(cancel)?;
            self.add_playlist(&mut plan, entry, cancel).await?;
        }
        for entry in self.config.artists.entries() {
            self.check_cancel(cancel)?;
            self.add_artist(&mut plan, entry, cancel).await?;
        }

        plan.compute_statistics();
        plan.validate_dag()?;
        tracing::info!(items = plan.items.len(), "Generated plan");
        Ok(plan)
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn add_song(
        &self,
        plan: &mut Plan,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if audio::is_audio_url(&entry.url) {
            if audio::is_playlist_url(&entry.url) {
                return self.add_audio_playlist(plan, entry, cancel).await;
            }
            return self.add_audio_video(plan, &entry.url, cancel).await;
        }

        // Track metadata is intentionally NOT pre-fetched; the downloader
        // resolves it when the item is dispatched.
        let id = adapter::extract_id(EntityKind::Track, &entry.url).ok_or_else(|| {
            Error::config(format!("unrecognized track URL in manifest: {}", entry.url))
        })?;
        let mut item = PlanItem::new(ItemKind::Track, "spotify", &id, entry.name.clone());
        item.source_url = Some(entry.url.clone());
        item.fingerprint = track_fingerprint("", &entry.name, Some(&id));
        plan.upsert(item);
        Ok(())
    }

    async fn add_album(
        &self,
        plan: &mut Plan,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if audio::is_audio_url(&entry.url) {
            return self.add_audio_playlist(plan, entry, cancel).await;
        }

        let album = self.spotify.get_album(&entry.url, cancel).await?;
        let mut container = PlanItem::new(ItemKind::Album, "spotify", &album.id, &album.name);
        container.source_url = Some(entry.url.clone());

        let year = adapter::extract_year(&album.release_date);
        for track in &album.tracks {
            let child = self.track_item(
                track,
                &container.id,
                Some((&album.name, &album.id, album.primary_artist())),
                year,
                album.cover_url.as_deref(),
                Some(album.total_tracks),
            );
            container.dependencies.insert(child.id.clone());
            plan.upsert(child);
        }
        plan.upsert(container);
        Ok(())
    }

    async fn add_playlist(
        &self,
        plan: &mut Plan,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if audio::is_audio_url(&entry.url) {
            return self.add_audio_playlist(plan, entry, cancel).await;
        }

        let playlist = self.spotify.get_playlist(&entry.url, cancel).await?;
        let name = if playlist.name.is_empty() {
            entry.name.clone()
        } else {
            playlist.name.clone()
        };
        let mut container = PlanItem::new(ItemKind::Playlist, "spotify", &playlist.id, name);
        container.source_url = Some(entry.url.clone());
        if entry.create_m3u {
            container
                .metadata
                .insert(meta_keys::CREATE_M3U.to_string(), serde_json::Value::Bool(true));
        }

        for track in &playlist.tracks {
            let year = track
                .release_date
                .as_deref()
                .map(adapter::extract_year)
                .unwrap_or(0);
            let child = self.track_item(
                track,
                &container.id,
                None,
                year,
                track.cover_url.as_deref(),
                track.total_tracks,
            );
            container.dependencies.insert(child.id.clone());
            plan.upsert(child);
        }
        plan.upsert(container);
        Ok(())
    }

    async fn add_artist(
        &self,
        plan: &mut Plan,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let artist = self.spotify.get_artist(&entry.url, cancel).await?;
        let mut artist_item = PlanItem::new(ItemKind::Artist, "spotify", &artist.id, &artist.name);
        artist_item.source_url = Some(entry.url.clone());

        let albums = self.spotify.get_artist_albums(&artist.id, cancel).await?;
        tracing::info!(artist = %artist.name, albums = albums.len(), "Expanding artist discography");

        for summary in albums {
            self.check_cancel(cancel)?;
            let album = self.spotify.get_album(&summary.id, cancel).await?;
            let mut container = PlanItem::new(ItemKind::Album, "spotify", &album.id, &album.name);
            container.parent_ids.insert(artist_item.id.clone());
            artist_item.dependencies.insert(container.id.clone());

            let year = adapter::extract_year(&album.release_date);
            for track in &album.tracks {
                let child = self.track_item(
                    track,
                    &container.id,
                    Some((&album.name, &album.id, album.primary_artist())),
                    year,
                    album.cover_url.as_deref(),
                    Some(album.total_tracks),
                );
                container.dependencies.insert(child.id.clone());
                plan.upsert(child);
            }
            plan.upsert(container);
        }
        plan.upsert(artist_item);
        Ok(())
    }

    /// Build a pre-populated track item under `parent_id`.
    fn track_item(
        &self,
        track: &TrackDetails,
        parent_id: &str,
        album_override: Option<(&str, &str, &str)>,
        year: i32,
        cover_url: Option<&str>,
        total_tracks: Option<u32>,
    ) -> PlanItem {
        let mut item = PlanItem::new(ItemKind::Track, "spotify", &track.id, &track.name);
        item.source_url = Some(format!("https://open.spotify.com/track/{}", track.id));
        item.parent_ids.insert(parent_id.to_string());
        item.fingerprint =
            track_fingerprint(track.primary_artist(), &track.name, Some(&track.id));

        let (album_name, album_id, album_artist) = match album_override {
            Some((name, id, artist)) => (
                Some(name.to_string()),
                Some(id.to_string()),
                Some(artist.to_string()),
            ),
            None => (
                track.album_name.clone(),
                track.album_id.clone(),
                track.album_artist.clone(),
            ),
        };

        let meta = &mut item.metadata;
        meta.insert(
            meta_keys::ARTIST.to_string(),
            serde_json::Value::String(track.primary_artist().to_string()),
        );
        if let Some(album) = album_name {
            meta.insert(meta_keys::ALBUM.to_string(), serde_json::Value::String(album));
        }
        if let Some(id) = album_id {
            meta.insert(meta_keys::ALBUM_ID.to_string(), serde_json::Value::String(id));
        }
        if let Some(artist) = album_artist {
            meta.insert(
                meta_keys::ALBUM_ARTIST.to_string(),
                serde_json::Value::String(artist),
            );
        }
        meta.insert(meta_keys::TRACK_NUMBER.to_string(), track.track_number.into());
        meta.insert(meta_keys::DISC_NUMBER.to_string(), track.disc_number.into());
        if year > 0 {
            meta.insert(meta_keys::YEAR.to_string(), year.into());
        }
        if let Some(cover) = cover_url {
            meta.insert(
                meta_keys::COVER_URL.to_string(),
                serde_json::Value::String(cover.to_string()),
            );
        }
        if let Some(total) = total_tracks {
            meta.insert(meta_keys::TOTAL_TRACKS.to_string(), total.into());
        }
        item
    }

    /// Add one direct-audio video as a track item.
    async fn add_audio_video(
        &self,
        plan: &mut Plan,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let video = self.audio.video_metadata(url, cancel).await?;
        let item = self.video_item(&video, None, cancel).await;
        plan.upsert(item);
        Ok(())
    }

    /// Expand a direct audio playlist into a container plus video items.
    async fn add_audio_playlist(
        &self,
        plan: &mut Plan,
        entry: &SourceEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let origin = AudioOrigin::from_url(&entry.url).unwrap_or(AudioOrigin::Youtube);
        let info = self.audio.playlist_info(&entry.url, cancel).await?;
        let name = if info.title.is_empty() {
            entry.name.clone()
        } else {
            info.title.clone()
        };
        let container_external = if info.id.is_empty() {
            crate::hashing::short_hash(entry.url.as_bytes())
        } else {
            info.id.clone()
        };
        let mut container =
            PlanItem::new(ItemKind::Playlist, origin.as_str(), &container_external, name);
        container.audio_url = Some(entry.url.clone());
        if entry.create_m3u {
            container
                .metadata
                .insert(meta_keys::CREATE_M3U.to_string(), serde_json::Value::Bool(true));
        }

        for video in &info.entries {
            self.check_cancel(cancel)?;
            let child = self.video_item(video, Some(&container.id), cancel).await;
            container.dependencies.insert(child.id.clone());
            plan.upsert(child);
        }
        plan.upsert(container);
        Ok(())
    }

    /// Build a track item from video metadata, with best-effort enhancement.
    async fn video_item(
        &self,
        video: &VideoMetadata,
        parent_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> PlanItem {
        let origin = AudioOrigin::from_url(&video.webpage_url).unwrap_or(AudioOrigin::Youtube);
        let mut item = PlanItem::new(ItemKind::Track, origin.as_str(), &video.id, &video.title);
        item.audio_url = Some(video.webpage_url.clone());
        let uploader = video.uploader.as_deref().unwrap_or("");
        item.fingerprint = track_fingerprint(uploader, &video.title, Some(&video.id));
        if let Some(parent) = parent_id {
            item.parent_ids.insert(parent.to_string());
        }
        if let Ok(json) = serde_json::to_value(video) {
            item.metadata
                .insert(meta_keys::YOUTUBE_METADATA.to_string(), json);
        }

        // Enhancement is best-effort: a failed search downgrades silently
        // to plain video metadata.
        let query = format!("{} {}", uploader, video.title);
        match self.spotify.search(query.trim(), cancel).await {
            Ok(results) => {
                if let Some(best) = results.into_iter().next()
                    && let Ok(json) = serde_json::to_value(&best)
                {
                    item.metadata
                        .insert(meta_keys::SPOTIFY_ENHANCEMENT.to_string(), json);
                }
            }
            Err(Error::Cancelled) => {}
            Err(e) => {
                tracing::debug!(error = %e, query = %query, "Enhancement search failed");
            }
        }
        item
    }
}
