//! Tag and cover-art embedding.
//!
//! Uses the lofty crate for format-independent metadata access, so the
//! same path handles ID3v2 (MP3), Vorbis comments (FLAC/Opus), and MP4
//! atoms (M4A). Cover art is fetched over HTTP and embedded as the front
//! cover; a cover failure degrades to tags-only rather than failing the
//! embed.

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt};
use std::path::Path;

use crate::downloader::Song;
use crate::error::{Error, Result};

/// Embeds metadata and cover art into finished audio files.
pub struct Tagger {
    http: reqwest::Client,
}

impl Tagger {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Write `song`'s tags (and cover, when available) into `path`.
    pub async fn embed(&self, path: &Path, song: &Song) -> Result<()> {
        let cover = match &song.cover_url {
            Some(url) => match self.fetch_cover(url).await {
                Ok(cover) => Some(cover),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Cover fetch failed, embedding tags only");
                    None
                }
            },
            None => None,
        };
        write_tags(path, song, cover)
    }

    async fn fetch_cover(&self, url: &str) -> Result<(Vec<u8>, MimeType)> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("cover request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "cover request rejected: HTTP {}",
                response.status()
            )));
        }
        let mime = match response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) if ct.contains("png") => MimeType::Png,
            _ => MimeType::Jpeg,
        };
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::upstream(format!("cover body read failed: {}", e)))?;
        Ok((bytes.to_vec(), mime))
    }
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronous tag write via lofty.
fn write_tags(path: &Path, song: &Song, cover: Option<(Vec<u8>, MimeType)>) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .map_err(|e| Error::embed(path, format!("failed to open: {}", e)))?
        .read()
        .map_err(|e| Error::embed(path, format!("failed to read: {}", e)))?;

    let tag_type = tagged_file.primary_tag_type();
    let tag = if let Some(tag) = tagged_file.tag_mut(tag_type) {
        tag
    } else {
        tagged_file.insert_tag(Tag::new(tag_type));
        tagged_file.tag_mut(tag_type).expect("Just inserted tag")
    };

    tag.set_title(song.title.clone());
    tag.set_artist(song.artist.clone());
    tag.set_album(song.album.clone());
    if !song.album_artist.is_empty() {
        tag.insert_text(ItemKey::AlbumArtist, song.album_artist.clone());
    }
    if song.track_number > 0 {
        tag.set_track(song.track_number);
    }
    if let Some(total) = song.total_tracks {
        tag.set_track_total(total);
    }
    if song.disc_number > 0 {
        tag.set_disk(song.disc_number);
    }
    if song.year > 0 {
        tag.set_year(song.year as u32);
    }
    if !song.date.is_empty() {
        tag.insert_text(ItemKey::RecordingDate, song.date.clone());
    }
    if let Some(isrc) = &song.isrc {
        tag.insert_text(ItemKey::Isrc, isrc.clone());
    }

    if let Some((data, mime)) = cover {
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime),
            None,
            data,
        ));
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::embed(path, format!("failed to save tags: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_tags_rejects_non_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-audio.mp3");
        std::fs::write(&path, b"definitely not an mp3").unwrap();

        let song = Song {
            title: "T".to_string(),
            artist: "A".to_string(),
            ..Default::default()
        };
        let result = write_tags(&path, &song, None);
        assert!(matches!(result, Err(Error::Embed { .. })));
    }

    #[test]
    fn test_write_tags_missing_file() {
        let song = Song::default();
        let result = write_tags(Path::new("/nonexistent/file.mp3"), &song, None);
        assert!(result.is_err());
    }
}
