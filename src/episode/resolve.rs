// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use tracing::{debug, warn};

use crate::error::EpisodeError;
use crate::feed::EpisodeDescriptor;
use crate::fetch::RateLimitedFetcher;
use crate::http::HttpClient;
use crate::state::ExistingFiles;

use super::filename::{clean_title, episode_path, extension_for_mime, normalize_mime};
use super::status::EpisodeStatus;

/// An episode with everything needed to download and tag it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEpisode {
    pub title: String,
    pub podcast: String,
    pub download_url: String,
    pub content_type: String,
    pub path: PathBuf,
    pub published: Option<DateTime<FixedOffset>>,
    /// Summary of the entry, or its subtitle when there is no summary
    pub description: Option<String>,
    pub episode_number: Option<u32>,
    status: EpisodeStatus,
}

impl ResolvedEpisode {
    /// Create a `Blank` episode; call [`mark_pending`](Self::mark_pending) once it is complete
    pub fn new(
        title: impl Into<String>,
        podcast: impl Into<String>,
        download_url: impl Into<String>,
        content_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            title: title.into(),
            podcast: podcast.into(),
            download_url: download_url.into(),
            content_type: content_type.into(),
            path: path.into(),
            published: None,
            description: None,
            episode_number: None,
            status: EpisodeStatus::Blank,
        }
    }

    pub fn status(&self) -> EpisodeStatus {
        self.status
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    ///
    /// Illegal transitions panic in debug builds and are ignored otherwise.
    pub fn set_status(&mut self, next: EpisodeStatus) {
        let allowed = self.status.can_transition_to(next);
        debug_assert!(
            allowed,
            "illegal status transition {} -> {} for '{}'",
            self.status, next, self.title
        );
        if allowed {
            self.status = next;
        } else {
            warn!(
                episode = %self.title,
                from = %self.status,
                to = %next,
                "Ignoring illegal status transition"
            );
        }
    }

    /// `Blank -> Pending`, only once URL and content type are known
    pub fn mark_pending(&mut self) -> bool {
        if self.download_url.trim().is_empty() || self.content_type.trim().is_empty() {
            return false;
        }
        self.set_status(EpisodeStatus::Pending);
        true
    }

    /// File name component of the destination path
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Pick the download link of an entry: `(href, declared type)`
///
/// Typed links win: the first one declaring an `audio` type is chosen. Only
/// an entry without any typed link falls back to its bare link, whose type
/// is then unknown.
pub fn find_download_link(descriptor: &EpisodeDescriptor) -> Option<(String, Option<String>)> {
    if !descriptor.links.is_empty() {
        return descriptor
            .links
            .iter()
            .filter(|link| !link.href.trim().is_empty())
            .find(|link| {
                link.mime_type
                    .as_deref()
                    .is_some_and(|t| t.trim().to_ascii_lowercase().starts_with("audio"))
            })
            .map(|link| (link.href.trim().to_string(), link.mime_type.clone()));
    }

    descriptor
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| (l.to_string(), None))
}

/// Resolves feed entries into downloadable episodes
pub struct EpisodeResolver<'a, C> {
    fetcher: &'a RateLimitedFetcher<C>,
    destination: &'a Path,
    existing: &'a ExistingFiles,
}

impl<'a, C: HttpClient> EpisodeResolver<'a, C> {
    pub fn new(
        fetcher: &'a RateLimitedFetcher<C>,
        destination: &'a Path,
        existing: &'a ExistingFiles,
    ) -> Self {
        Self {
            fetcher,
            destination,
            existing,
        }
    }

    /// Resolve one entry; the result is `Pending`, or `Downloaded` if its file already exists
    pub async fn resolve(
        &self,
        descriptor: EpisodeDescriptor,
        podcast: &str,
    ) -> Result<ResolvedEpisode, EpisodeError> {
        let title = clean_title(&descriptor.title);

        let (download_url, declared_type) =
            find_download_link(&descriptor).ok_or_else(|| EpisodeError::NoDownloadLink {
                title: title.clone(),
                podcast: podcast.to_string(),
            })?;

        let content_type = match declared_type.filter(|t| !t.trim().is_empty()) {
            Some(content_type) => normalize_mime(&content_type),
            None => self.head_content_type(&download_url, &title, podcast).await?,
        };

        let extension = extension_for_mime(&content_type).ok_or_else(|| {
            EpisodeError::UnsupportedContentType {
                title: title.clone(),
                content_type: content_type.clone(),
            }
        })?;

        let path = episode_path(self.destination, podcast, &title, extension);

        let mut episode = ResolvedEpisode::new(title, podcast, download_url, content_type, path);
        episode.published = descriptor.published;
        episode.description = descriptor.summary.or(descriptor.subtitle);
        episode.episode_number = descriptor.episode_number;

        if !episode.mark_pending() {
            return Err(EpisodeError::NoDownloadLink {
                title: episode.title,
                podcast: podcast.to_string(),
            });
        }

        if self.existing.contains(&episode.path) {
            debug!(podcast, episode = %episode.title, "Episode already downloaded");
            episode.set_status(EpisodeStatus::Downloaded);
        }

        Ok(episode)
    }

    async fn head_content_type(
        &self,
        url: &str,
        title: &str,
        podcast: &str,
    ) -> Result<String, EpisodeError> {
        let response = self
            .fetcher
            .fetch(url, true)
            .await
            .map_err(|e| EpisodeError::Network {
                title: title.to_string(),
                podcast: podcast.to_string(),
                source: e,
            })?;

        if !response.is_success() {
            return Err(EpisodeError::HeadStatus {
                title: title.to_string(),
                podcast: podcast.to_string(),
                status: response.status,
            });
        }

        response
            .content_type
            .as_deref()
            .map(normalize_mime)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EpisodeError::UnknownContentType {
                title: title.to_string(),
                podcast: podcast.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::TransportError;
    use crate::feed::FeedLink;
    use crate::fetch::RetryPolicy;
    use crate::http::HttpResponse;

    struct HeadClient {
        status: u16,
        content_type: Option<&'static str>,
        heads: AtomicUsize,
    }

    impl HeadClient {
        fn new(status: u16, content_type: Option<&'static str>) -> Self {
            Self {
                status,
                content_type,
                heads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpClient for HeadClient {
        async fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            panic!("resolution must never download content");
        }

        async fn head(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            self.heads.fetch_add(1, Ordering::SeqCst);
            let mut response = HttpResponse::empty(self.status);
            response.content_type = self.content_type.map(String::from);
            Ok(response)
        }
    }

    fn fetcher(content_type: Option<&'static str>) -> RateLimitedFetcher<HeadClient> {
        fetcher_with_status(200, content_type)
    }

    fn fetcher_with_status(
        status: u16,
        content_type: Option<&'static str>,
    ) -> RateLimitedFetcher<HeadClient> {
        RateLimitedFetcher::new(
            HeadClient::new(status, content_type),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
            },
        )
    }

    fn link(href: &str, mime: Option<&str>, rel: &str) -> FeedLink {
        FeedLink {
            href: href.to_string(),
            mime_type: mime.map(String::from),
            rel: rel.to_string(),
            length: None,
        }
    }

    const ENCLOSURE: &str = "https://dts.podtrac.com/redirect.mp3/chtbl.com/track/242FB3/traffic.libsyn.com/secure/evenmorenews/EMN_Ep142.mp3?dest-id=695480";

    fn descriptor(title: &str, links: Vec<FeedLink>) -> EpisodeDescriptor {
        EpisodeDescriptor {
            title: title.to_string(),
            links,
            ..Default::default()
        }
    }

    #[test]
    fn enclosure_wins_over_html_alternate() {
        let entry = descriptor(
            "Ep 142",
            vec![
                link("http://evenmorenewspodcast.com/ep-142", Some("text/html"), "alternate"),
                link(ENCLOSURE, Some("audio/mpeg"), "enclosure"),
            ],
        );

        assert_eq!(
            find_download_link(&entry),
            Some((ENCLOSURE.to_string(), Some("audio/mpeg".to_string())))
        );
    }

    #[test]
    fn only_non_audio_links_yield_nothing() {
        let mut entry = descriptor(
            "test",
            vec![link("http://evenmorenewspodcast.com/ep-142", Some("text/html"), "alternate")],
        );
        entry.link = Some("http://evenmorenewspodcast.com/ep-142".to_string());

        assert_eq!(find_download_link(&entry), None);
    }

    #[test]
    fn bare_link_is_used_when_there_are_no_typed_links() {
        let mut entry = descriptor("test", vec![]);
        entry.link = Some(" https://example.com/audio ".to_string());

        assert_eq!(
            find_download_link(&entry),
            Some(("https://example.com/audio".to_string(), None))
        );
    }

    #[tokio::test]
    async fn resolve_produces_pending_episode_with_clean_title() {
        let fetcher = fetcher(None);
        let existing = ExistingFiles::default();
        let resolver = EpisodeResolver::new(&fetcher, Path::new("testdirectory"), &existing);

        let mut entry = descriptor(
            "Bad /Test\0 Title",
            vec![link(ENCLOSURE, Some("audio/mpeg"), "enclosure")],
        );
        entry.summary = Some("Summary".to_string());
        entry.subtitle = Some("Subtitle".to_string());
        entry.episode_number = Some(142);

        let episode = resolver.resolve(entry, "test podcast").await.unwrap();

        assert_eq!(episode.title, "Bad Test Title");
        assert_eq!(episode.download_url, ENCLOSURE);
        assert_eq!(episode.content_type, "audio/mpeg");
        assert_eq!(episode.status(), EpisodeStatus::Pending);
        assert_eq!(
            episode.path,
            PathBuf::from("testdirectory/test podcast/Bad Test Title.mp3")
        );
        assert_eq!(episode.description.as_deref(), Some("Summary"));
        assert_eq!(episode.episode_number, Some(142));
        assert_eq!(fetcher.client().heads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_asks_server_for_missing_content_type() {
        let fetcher = fetcher(Some("audio/x-m4a; charset=binary"));
        let existing = ExistingFiles::default();
        let resolver = EpisodeResolver::new(&fetcher, Path::new("dest"), &existing);

        let mut entry = descriptor("Untyped", vec![]);
        entry.link = Some("https://example.com/untyped".to_string());
        entry.subtitle = Some("Only a subtitle".to_string());

        let episode = resolver.resolve(entry, "pod").await.unwrap();

        assert_eq!(episode.content_type, "audio/x-m4a");
        assert!(episode.path.to_string_lossy().ends_with("Untyped.m4a"));
        assert_eq!(episode.description.as_deref(), Some("Only a subtitle"));
        assert_eq!(fetcher.client().heads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_fails_without_audio_link() {
        let fetcher = fetcher(None);
        let existing = ExistingFiles::default();
        let resolver = EpisodeResolver::new(&fetcher, Path::new("dest"), &existing);

        let entry = descriptor(
            "test",
            vec![link("https://example.com/page", Some("text/html"), "alternate")],
        );

        let err = resolver.resolve(entry, "pod").await.unwrap_err();
        assert!(matches!(err, EpisodeError::NoDownloadLink { .. }));
    }

    #[tokio::test]
    async fn resolve_fails_for_unknown_codec() {
        let fetcher = fetcher(None);
        let existing = ExistingFiles::default();
        let resolver = EpisodeResolver::new(&fetcher, Path::new("dest"), &existing);

        for mime in ["audio/example", "audio/random"] {
            let entry = descriptor("test", vec![link(ENCLOSURE, Some(mime), "enclosure")]);
            let err = resolver.resolve(entry, "pod").await.unwrap_err();
            assert!(matches!(err, EpisodeError::UnsupportedContentType { .. }));
        }
    }

    #[tokio::test]
    async fn resolve_fails_when_server_reports_no_type() {
        let fetcher = fetcher(None);
        let existing = ExistingFiles::default();
        let resolver = EpisodeResolver::new(&fetcher, Path::new("dest"), &existing);

        let mut entry = descriptor("test", vec![]);
        entry.link = Some("https://example.com/mystery".to_string());

        let err = resolver.resolve(entry, "pod").await.unwrap_err();
        assert!(matches!(err, EpisodeError::UnknownContentType { .. }));
    }

    #[tokio::test]
    async fn error_page_type_is_not_taken_as_episode_type() {
        let fetcher = fetcher_with_status(404, Some("text/html; charset=utf-8"));
        let existing = ExistingFiles::default();
        let resolver = EpisodeResolver::new(&fetcher, Path::new("dest"), &existing);

        let mut entry = descriptor("Gone", vec![]);
        entry.link = Some("https://example.com/gone".to_string());

        let err = resolver.resolve(entry, "pod").await.unwrap_err();
        assert!(matches!(
            err,
            EpisodeError::HeadStatus { status: 404, ref title, .. } if title == "Gone"
        ));
        assert_eq!(fetcher.client().heads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existing_file_marks_episode_downloaded() {
        let fetcher = fetcher(None);
        let existing =
            ExistingFiles::from_paths([PathBuf::from("dest/pod/Already Here.mp3")]);
        let resolver = EpisodeResolver::new(&fetcher, Path::new("dest"), &existing);

        let entry = descriptor(
            "Already Here",
            vec![link("https://example.com/here.mp3", Some("audio/mpeg"), "enclosure")],
        );

        let episode = resolver.resolve(entry, "pod").await.unwrap();
        assert_eq!(episode.status(), EpisodeStatus::Downloaded);
    }

    #[test]
    fn mark_pending_requires_url_and_type() {
        let mut episode = ResolvedEpisode::new("t", "p", "", "audio/mpeg", "p/t.mp3");
        assert!(!episode.mark_pending());
        assert_eq!(episode.status(), EpisodeStatus::Blank);

        let mut episode = ResolvedEpisode::new("t", "p", "https://e.com/t.mp3", "audio/mpeg", "p/t.mp3");
        assert!(episode.mark_pending());
        assert_eq!(episode.status(), EpisodeStatus::Pending);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal status transition")]
    fn illegal_transition_panics_in_debug_builds() {
        let mut episode = ResolvedEpisode::new("t", "p", "https://e.com/t.mp3", "audio/mpeg", "p/t.mp3");
        episode.set_status(EpisodeStatus::Downloaded);
    }
}
