//! Per-podcast playlist files
//!
//! Playlists list episodes oldest-first. Feeds publish newest-first, so the
//! episodes are written in reverse feed order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::episode::ResolvedEpisode;
use crate::error::PlaylistError;

/// Supported playlist formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaylistFormat {
    /// `episode_playlist.m3u` with relative file references
    M3u,
    /// `episode_playlist.audpl` for Audacious
    Audacious,
    /// `episode_list.txt`, one title per line
    Text,
}

impl PlaylistFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            PlaylistFormat::M3u => "episode_playlist.m3u",
            PlaylistFormat::Audacious => "episode_playlist.audpl",
            PlaylistFormat::Text => "episode_list.txt",
        }
    }

    /// Render the playlist for episodes given in feed order
    pub fn render(self, podcast_title: &str, episodes: &[ResolvedEpisode]) -> String {
        let mut out = String::new();
        let oldest_first = episodes.iter().rev();

        match self {
            PlaylistFormat::M3u => {
                out.push_str("#EXTM3U\n");
                for episode in oldest_first {
                    let name = episode.file_name();
                    if name.is_empty() {
                        warn!(episode = %episode.title, "Could not write episode to playlist");
                        continue;
                    }
                    out.push_str(&format!("./{name}\n"));
                }
            }
            PlaylistFormat::Audacious => {
                out.push_str(&encode_spaces(&format!("title={podcast_title}\n")));
                for episode in oldest_first {
                    if episode.path.as_os_str().is_empty() {
                        warn!(episode = %episode.title, "Could not write episode to playlist");
                        continue;
                    }
                    let uri = format!("uri=file://{}\n", episode.path.display());
                    out.push_str(&encode_spaces(&uri));
                    out.push_str(&encode_spaces(&format!("title={}\n", episode.title)));
                }
            }
            PlaylistFormat::Text => {
                for episode in oldest_first {
                    out.push_str(&episode.title);
                    out.push('\n');
                }
            }
        }

        out
    }
}

fn encode_spaces(line: &str) -> String {
    line.replace(' ', "%20")
}

impl fmt::Display for PlaylistFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaylistFormat::M3u => "m3u",
            PlaylistFormat::Audacious => "audacious",
            PlaylistFormat::Text => "text",
        };
        f.write_str(name)
    }
}

impl FromStr for PlaylistFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m3u" => Ok(PlaylistFormat::M3u),
            "audacious" => Ok(PlaylistFormat::Audacious),
            "text" => Ok(PlaylistFormat::Text),
            other => Err(format!(
                "unknown playlist format '{other}' (expected m3u, audacious or text)"
            )),
        }
    }
}

/// Write every requested playlist into `directory`, returning the written paths
pub fn write_playlists(
    formats: &[PlaylistFormat],
    podcast_title: &str,
    directory: &Path,
    episodes: &[ResolvedEpisode],
) -> Result<Vec<PathBuf>, PlaylistError> {
    let mut written = Vec::with_capacity(formats.len());

    for format in formats {
        let path = directory.join(format.file_name());
        std::fs::write(&path, format.render(podcast_title, episodes)).map_err(|e| {
            PlaylistError {
                path: path.clone(),
                source: e,
            }
        })?;
        debug!(podcast = podcast_title, path = %path.display(), "Wrote playlist");
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn episodes(dir: &Path) -> Vec<ResolvedEpisode> {
        ["Third Episode", "Second Episode", "First Episode"]
            .into_iter()
            .map(|title| {
                ResolvedEpisode::new(
                    title,
                    "My Show",
                    "https://example.com/a.mp3",
                    "audio/mpeg",
                    dir.join("My Show").join(format!("{title}.mp3")),
                )
            })
            .collect()
    }

    #[test]
    fn m3u_lists_relative_paths_oldest_first() {
        let rendered = PlaylistFormat::M3u.render("My Show", &episodes(Path::new("/pods")));

        assert_eq!(
            rendered,
            "#EXTM3U\n./First Episode.mp3\n./Second Episode.mp3\n./Third Episode.mp3\n"
        );
    }

    #[test]
    fn audacious_encodes_spaces() {
        let rendered = PlaylistFormat::Audacious.render("My Show", &episodes(Path::new("/pods")));
        let lines: Vec<_> = rendered.lines().collect();

        assert_eq!(lines[0], "title=My%20Show");
        assert_eq!(lines[1], "uri=file:///pods/My%20Show/First%20Episode.mp3");
        assert_eq!(lines[2], "title=First%20Episode");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn text_lists_titles_oldest_first() {
        let rendered = PlaylistFormat::Text.render("My Show", &episodes(Path::new("/pods")));

        assert_eq!(rendered, "First Episode\nSecond Episode\nThird Episode\n");
    }

    #[test]
    fn episodes_without_path_are_skipped() {
        let mut list = episodes(Path::new("/pods"));
        list[1].path = PathBuf::new();

        let rendered = PlaylistFormat::M3u.render("My Show", &list);

        assert_eq!(rendered, "#EXTM3U\n./First Episode.mp3\n./Third Episode.mp3\n");
    }

    #[test]
    fn formats_parse_from_cli_names() {
        assert_eq!("m3u".parse::<PlaylistFormat>(), Ok(PlaylistFormat::M3u));
        assert_eq!("Audacious".parse::<PlaylistFormat>(), Ok(PlaylistFormat::Audacious));
        assert_eq!("text".parse::<PlaylistFormat>(), Ok(PlaylistFormat::Text));
        assert!("pls".parse::<PlaylistFormat>().is_err());
    }

    #[test]
    fn write_playlists_creates_requested_files() {
        let dir = tempdir().unwrap();

        let written = write_playlists(
            &[PlaylistFormat::M3u, PlaylistFormat::Text],
            "My Show",
            dir.path(),
            &episodes(dir.path()),
        )
        .unwrap();

        assert_eq!(written.len(), 2);
        assert!(dir.path().join("episode_playlist.m3u").exists());
        assert!(dir.path().join("episode_list.txt").exists());
        assert!(!dir.path().join("episode_playlist.audpl").exists());
    }
}
