//! Output path rendering from the configured template.
//!
//! Substituted values come from third-party catalogs, so every value is
//! sanitized before it lands in a path component: filesystem-hostile
//! characters become `_`, `..` is defused to stop traversal out of the
//! output root, and components are capped at 255 characters.

use std::path::PathBuf;

use super::Song;
use crate::config::AudioFormat;

/// Maximum length of a single substituted value.
const MAX_COMPONENT_LEN: usize = 255;

/// Render the output path for `song`.
///
/// Supported placeholders: `{artist}`, `{album}`, `{album-artist}`,
/// `{title}`, `{track-number}`, `{track-number:02}`, `{disc-number}`,
/// `{disc-number:02}`, `{year}`, `{output-ext}`. Slashes in the template
/// itself separate directories; slashes inside substituted values do not.
pub fn render_output_path(template: &str, song: &Song, format: AudioFormat) -> PathBuf {
    let rendered = template
        .replace("{artist}", &sanitize_component(&song.artist))
        .replace("{album}", &sanitize_component(&song.album))
        .replace("{album-artist}", &sanitize_component(&song.album_artist))
        .replace("{title}", &sanitize_component(&song.title))
        .replace("{track-number:02}", &format!("{:02}", song.track_number))
        .replace("{track-number}", &song.track_number.to_string())
        .replace("{disc-number:02}", &format!("{:02}", song.disc_number))
        .replace("{disc-number}", &song.disc_number.to_string())
        .replace("{year}", &song.year.to_string())
        .replace("{output-ext}", format.extension());

    // Clean the final path: drop empty and current-dir segments the
    // substitution may have produced, keeping an absolute root.
    let mut path = if rendered.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    for segment in rendered.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        path.push(segment);
    }
    path
}

/// Sanitize one path component sourced from catalog data.
///
/// Replaces `/ \ : * ? " < > |` with `_`, collapses `..` to `_`, trims
/// leading/trailing dots and spaces, caps the length, and maps the empty
/// result to `_`.
pub fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let defused = replaced.replace("..", "_");
    let trimmed = defused.trim_matches(|c| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(MAX_COMPONENT_LEN).collect();
    if capped.is_empty() {
        "_".to_string()
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> Song {
        Song {
            title: "The Title".to_string(),
            artist: "The Artist".to_string(),
            album: "The Album".to_string(),
            album_artist: "The Artist".to_string(),
            track_number: 3,
            disc_number: 1,
            year: 1999,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_standard_template() {
        let path = render_output_path(
            "music/{artist}/{album}/{track-number:02} - {title}.{output-ext}",
            &song(),
            AudioFormat::Mp3,
        );
        assert_eq!(
            path,
            PathBuf::from("music/The Artist/The Album/03 - The Title.mp3")
        );
    }

    #[test]
    fn test_render_sanitizes_values_not_template() {
        let mut dirty = song();
        dirty.artist = "AC/DC".to_string();
        dirty.title = "What?".to_string();
        let path = render_output_path("{artist}/{title}.{output-ext}", &dirty, AudioFormat::Flac);
        assert_eq!(path, PathBuf::from("AC_DC/What_.flac"));
    }

    #[test]
    fn test_render_defuses_traversal() {
        let mut evil = song();
        evil.album = "..".to_string();
        evil.title = "../../etc/passwd".to_string();
        let path = render_output_path("music/{album}/{title}.{output-ext}", &evil, AudioFormat::Mp3);
        for component in path.components() {
            let text = component.as_os_str().to_string_lossy();
            assert_ne!(text, "..");
            assert!(!text.contains('/'));
        }
        assert!(path.starts_with("music"));
    }

    #[test]
    fn test_sanitize_component_edge_cases() {
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("..."), "_");
        assert_eq!(sanitize_component("  .name.  "), "name");
        assert_eq!(sanitize_component("a..b"), "a_b");
        assert_eq!(sanitize_component("col: on"), "col_ on");
        let long = "x".repeat(600);
        assert_eq!(sanitize_component(&long).len(), 255);
    }

    #[test]
    fn test_unpadded_and_padded_numbers() {
        let path = render_output_path(
            "{disc-number}-{track-number:02} {title}.{output-ext}",
            &song(),
            AudioFormat::Opus,
        );
        assert_eq!(path, PathBuf::from("1-03 The Title.opus"));
    }
}
