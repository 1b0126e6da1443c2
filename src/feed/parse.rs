// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};

/// A feed document reduced to the data the downloader needs
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub entries: Vec<EpisodeDescriptor>,
}

/// A link attached to a feed entry (RSS enclosure/link, Atom `<link>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLink {
    pub href: String,
    pub mime_type: Option<String>,
    pub rel: String,
    pub length: Option<u64>,
}

/// Raw per-entry data extracted from a feed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EpisodeDescriptor {
    pub title: String,
    /// All typed links of the entry, enclosures included
    pub links: Vec<FeedLink>,
    /// Bare link used when the entry carries no typed links at all
    pub link: Option<String>,
    pub published: Option<DateTime<FixedOffset>>,
    pub summary: Option<String>,
    pub subtitle: Option<String>,
    pub episode_number: Option<u32>,
}

/// Why a document could not be turned into a [`ParsedFeed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFeed(pub String);

impl std::fmt::Display for MalformedFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns raw feed bytes into structured entries
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, MalformedFeed>;
}

/// Parser for RSS 2.0 documents, falling back to Atom
#[derive(Debug, Default, Clone, Copy)]
pub struct RssAtomParser;

impl FeedParser for RssAtomParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, MalformedFeed> {
        match rss::Channel::read_from(bytes) {
            Ok(channel) => Ok(from_rss(&channel)),
            Err(rss_err) => match atom_syndication::Feed::read_from(bytes) {
                Ok(feed) => Ok(from_atom(&feed)),
                Err(atom_err) => Err(MalformedFeed(format!(
                    "not RSS ({rss_err}) and not Atom ({atom_err})"
                ))),
            },
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn from_rss(channel: &rss::Channel) -> ParsedFeed {
    ParsedFeed {
        title: channel.title().to_string(),
        entries: channel.items().iter().map(rss_entry).collect(),
    }
}

fn rss_entry(item: &rss::Item) -> EpisodeDescriptor {
    let mut links = Vec::new();

    if let Some(link) = non_empty(item.link()) {
        links.push(FeedLink {
            href: link,
            mime_type: Some("text/html".to_string()),
            rel: "alternate".to_string(),
            length: None,
        });
    }

    if let Some(enclosure) = item.enclosure() {
        links.push(FeedLink {
            href: enclosure.url().to_string(),
            mime_type: non_empty(Some(enclosure.mime_type())),
            rel: "enclosure".to_string(),
            length: enclosure.length().parse().ok(),
        });
    }

    let itunes = item.itunes_ext();

    EpisodeDescriptor {
        title: item.title().unwrap_or_default().to_string(),
        links,
        link: non_empty(item.link()),
        published: item.pub_date().and_then(parse_date),
        summary: itunes
            .and_then(|ext| non_empty(ext.summary()))
            .or_else(|| non_empty(item.description())),
        subtitle: itunes.and_then(|ext| non_empty(ext.subtitle())),
        episode_number: itunes
            .and_then(|ext| ext.episode())
            .and_then(|e| e.trim().parse().ok()),
    }
}

fn from_atom(feed: &atom_syndication::Feed) -> ParsedFeed {
    ParsedFeed {
        title: feed.title().as_str().to_string(),
        entries: feed.entries().iter().map(atom_entry).collect(),
    }
}

fn atom_entry(entry: &atom_syndication::Entry) -> EpisodeDescriptor {
    let links = entry
        .links()
        .iter()
        .map(|link| FeedLink {
            href: link.href().to_string(),
            mime_type: non_empty(link.mime_type()),
            rel: link.rel().to_string(),
            length: link.length().and_then(|l| l.parse().ok()),
        })
        .collect();

    EpisodeDescriptor {
        title: entry.title().as_str().to_string(),
        links,
        link: None,
        published: entry.published().copied().or(Some(*entry.updated())),
        summary: entry.summary().and_then(|s| non_empty(Some(s.as_str()))),
        subtitle: None,
        episode_number: None,
    }
}

/// Parse an RSS date, tolerating the usual deviations from RFC 2822
fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let date_str = date_str.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt);
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(date_str).ok())
}
