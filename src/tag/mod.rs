// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod mp4;
mod mpeg;

use std::path::Path;

use crate::episode::{ResolvedEpisode, extension_for_mime};
use crate::error::TagError;

/// Metadata written into a downloaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeTags {
    pub title: String,
    /// The podcast title, stored as album
    pub album: String,
    /// Publication time as `YYYY-MM-DDTHH:MM:SS` in the feed's own offset
    pub date: Option<String>,
    /// Plain-text description with HTML entities decoded
    pub description: Option<String>,
    pub track: Option<u32>,
}

impl EpisodeTags {
    pub fn from_episode(episode: &ResolvedEpisode) -> Self {
        Self {
            title: episode.title.clone(),
            album: episode.podcast.clone(),
            date: episode
                .published
                .map(|dt| dt.naive_local().format("%Y-%m-%dT%H:%M:%S").to_string()),
            description: episode
                .description
                .as_deref()
                .map(|d| html_escape::decode_html_entities(d).trim().to_string())
                .filter(|d| !d.is_empty()),
            track: episode.episode_number,
        }
    }
}

/// Container formats we know how to tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    Mp3,
    Mp4,
    Unsupported,
}

impl TagFormat {
    /// Pick the format from the content type, falling back to the file extension
    pub fn detect(content_type: &str, path: &Path) -> Self {
        let extension = extension_for_mime(content_type)
            .map(|ext| ext.trim_start_matches('.').to_string())
            .or_else(|| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase)
            });

        match extension.as_deref() {
            Some("mp3") => TagFormat::Mp3,
            Some("m4a") | Some("mp4") => TagFormat::Mp4,
            _ => TagFormat::Unsupported,
        }
    }
}

/// Writes descriptive metadata into a downloaded episode file
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, episode: &ResolvedEpisode, tags: &EpisodeTags) -> Result<(), TagError>;
}

/// [`TagWriter`] that edits ID3v2.4 tags of MP3 files and iTunes atoms of MP4 files
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTagWriter;

impl TagWriter for FileTagWriter {
    fn write_tags(&self, episode: &ResolvedEpisode, tags: &EpisodeTags) -> Result<(), TagError> {
        let path = episode.path.as_path();
        match TagFormat::detect(&episode.content_type, path) {
            TagFormat::Mp3 => mpeg::write(path, tags).map_err(|e| TagError::Id3 {
                path: path.to_path_buf(),
                source: e,
            }),
            TagFormat::Mp4 => mp4::write(path, tags).map_err(|e| TagError::Mp4 {
                path: path.to_path_buf(),
                source: e,
            }),
            TagFormat::Unsupported => Err(TagError::Unsupported {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::DateTime;
    use tempfile::tempdir;

    fn episode(path: &Path, content_type: &str) -> ResolvedEpisode {
        let mut episode = ResolvedEpisode::new(
            "Test &amp; Title",
            "Test Podcast",
            "https://example.com/ep.mp3",
            content_type,
            path,
        );
        episode.published = DateTime::parse_from_rfc2822("Mon, 15 Jan 2024 12:00:00 +0100").ok();
        episode.description = Some("Rock &amp; roll &lt;3 ".to_string());
        episode.episode_number = Some(7);
        episode
    }

    #[test]
    fn tags_are_derived_from_episode() {
        let tags = EpisodeTags::from_episode(&episode(Path::new("x.mp3"), "audio/mpeg"));

        assert_eq!(tags.title, "Test &amp; Title");
        assert_eq!(tags.album, "Test Podcast");
        assert_eq!(tags.date.as_deref(), Some("2024-01-15T12:00:00"));
        assert_eq!(tags.description.as_deref(), Some("Rock & roll <3"));
        assert_eq!(tags.track, Some(7));
    }

    #[test]
    fn format_follows_content_type_then_extension() {
        assert_eq!(TagFormat::detect("audio/mpeg", Path::new("a.bin")), TagFormat::Mp3);
        assert_eq!(TagFormat::detect("audio/x-m4a", Path::new("a")), TagFormat::Mp4);
        assert_eq!(TagFormat::detect("", Path::new("a.MP3")), TagFormat::Mp3);
        assert_eq!(TagFormat::detect("audio/flac", Path::new("a.flac")), TagFormat::Unsupported);
        assert_eq!(TagFormat::detect("audio/ogg", Path::new("a.opus")), TagFormat::Unsupported);
    }

    #[test]
    fn unsupported_formats_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.flac");
        std::fs::write(&path, b"fLaC").unwrap();
        let episode = episode(&path, "audio/flac");

        let err = FileTagWriter
            .write_tags(&episode, &EpisodeTags::from_episode(&episode))
            .unwrap_err();

        assert!(matches!(err, TagError::Unsupported { .. }));
    }

    #[test]
    fn mp3_files_receive_id3_tags() {
        use id3::{Tag, TagLike};

        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3");
        std::fs::write(&path, vec![0u8; 256]).unwrap();
        let episode = episode(&path, "audio/mpeg");

        FileTagWriter
            .write_tags(&episode, &EpisodeTags::from_episode(&episode))
            .unwrap();

        let tag = Tag::read_from_path(&path).unwrap();
        assert_eq!(tag.title(), Some("Test &amp; Title"));
        assert_eq!(tag.album(), Some("Test Podcast"));
        assert_eq!(tag.track(), Some(7));
    }

    #[test]
    fn invalid_mp4_files_fail_to_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.m4a");
        std::fs::write(&path, b"definitely not an mp4 container").unwrap();
        let episode = episode(&path, "audio/mp4");

        let err = FileTagWriter
            .write_tags(&episode, &EpisodeTags::from_episode(&episode))
            .unwrap_err();

        assert!(matches!(err, TagError::Mp4 { .. }));
    }
}
