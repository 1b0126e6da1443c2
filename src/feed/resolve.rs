// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use crate::error::FeedError;
use crate::fetch::RateLimitedFetcher;
use crate::http::HttpClient;

use super::parse::{EpisodeDescriptor, FeedParser};

/// A fetched and parsed feed, reduced to plain data
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFeed {
    pub source: String,
    pub title: String,
    pub episodes: Vec<EpisodeDescriptor>,
    /// `<destination>/<title>`
    pub directory: PathBuf,
}

/// Reduce a podcast title to ASCII and strip path separators
///
/// Non-ASCII characters are dropped, not replaced.
pub fn sanitize_podcast_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii() && *c != '/' && *c != '\0')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Fetches and parses one feed at a time
pub struct FeedResolver<'a, C, P> {
    fetcher: &'a RateLimitedFetcher<C>,
    parser: &'a P,
    destination: &'a Path,
    limit: Option<usize>,
}

impl<'a, C: HttpClient, P: FeedParser> FeedResolver<'a, C, P> {
    pub fn new(
        fetcher: &'a RateLimitedFetcher<C>,
        parser: &'a P,
        destination: &'a Path,
        limit: Option<usize>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            destination,
            limit,
        }
    }

    pub async fn resolve(&self, source: &str) -> Result<ResolvedFeed, FeedError> {
        let source = source.trim();
        let url = Url::parse(source).map_err(|e| FeedError::InvalidUrl {
            url: source.to_string(),
            source: e,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FeedError::UnsupportedScheme(source.to_string()));
        }

        let (status, bytes) =
            self.fetcher
                .fetch_bytes(source)
                .await
                .map_err(|e| FeedError::Network {
                    url: source.to_string(),
                    source: e,
                })?;

        if !(200..300).contains(&status) {
            return Err(FeedError::HttpStatus {
                url: source.to_string(),
                status,
            });
        }

        let parsed = self
            .parser
            .parse(&bytes)
            .map_err(|e| FeedError::Malformed {
                url: source.to_string(),
                reason: e.to_string(),
            })?;

        let title = sanitize_podcast_title(&parsed.title);
        if title.is_empty() {
            return Err(FeedError::MissingTitle(source.to_string()));
        }

        let mut episodes = parsed.entries;
        if let Some(limit) = self.limit {
            episodes.truncate(limit);
        }

        debug!(
            feed = source,
            podcast = %title,
            episodes = episodes.len(),
            "Feed resolved"
        );

        Ok(ResolvedFeed {
            source: source.to_string(),
            directory: self.destination.join(&title),
            title,
            episodes,
        })
    }
}

/// Create the podcast directory of a resolved feed if it is missing
pub fn ensure_directory(feed: &ResolvedFeed) -> Result<(), FeedError> {
    std::fs::create_dir_all(&feed.directory).map_err(|e| FeedError::CreateDirectory {
        path: feed.directory.clone(),
        source: e,
    })
}
