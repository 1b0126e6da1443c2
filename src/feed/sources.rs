// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;

/// Extract the feed URL from one line of a feed list
///
/// Blank lines and full-line comments yield `None`; a `#` preceded by
/// whitespace starts a trailing comment. A `#` inside the URL is kept.
pub fn clean_text_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let end = line
        .char_indices()
        .find(|&(i, c)| {
            c == '#'
                && line[..i]
                    .chars()
                    .next_back()
                    .is_some_and(char::is_whitespace)
        })
        .map(|(i, _)| i)
        .unwrap_or(line.len());

    let feed = line[..end].trim_end();
    (!feed.is_empty()).then(|| feed.to_string())
}

/// Parse a newline-delimited feed list
pub fn parse_feed_list(content: &str) -> Vec<String> {
    content.lines().filter_map(clean_text_line).collect()
}

/// Load feed URLs from newline-delimited text files
pub fn load_feeds_from_text_files(paths: &[impl AsRef<Path>]) -> Result<Vec<String>, SourceError> {
    let mut feeds = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        for feed in parse_feed_list(&content) {
            debug!(feed = %feed, list = %path.display(), "Feed added");
            feeds.push(feed);
        }
    }
    Ok(feeds)
}

#[derive(Debug, Deserialize)]
struct Opml {
    body: OpmlBody,
}

#[derive(Debug, Deserialize)]
struct OpmlBody {
    #[serde(rename = "outline", default)]
    outlines: Vec<Outline>,
}

#[derive(Debug, Deserialize)]
struct Outline {
    #[serde(rename = "@xmlUrl")]
    xml_url: Option<String>,
    #[serde(rename = "outline", default)]
    children: Vec<Outline>,
}

fn collect_outlines(outlines: Vec<Outline>, feeds: &mut Vec<String>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.filter(|u| !u.trim().is_empty()) {
            feeds.push(url.trim().to_string());
        }
        collect_outlines(outline.children, feeds);
    }
}

/// Extract every `outline[xmlUrl]` from an OPML document, nested ones included
pub fn parse_opml(content: &str) -> Result<Vec<String>, quick_xml::de::DeError> {
    let opml: Opml = quick_xml::de::from_str(content)?;
    let mut feeds = Vec::new();
    collect_outlines(opml.body.outlines, &mut feeds);
    Ok(feeds)
}

/// Load feed URLs from OPML subscription files
pub fn load_feeds_from_opml(paths: &[impl AsRef<Path>]) -> Result<Vec<String>, SourceError> {
    let mut feeds = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let found = parse_opml(&content).map_err(|e| SourceError::OpmlParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        for feed in found {
            debug!(feed = %feed, opml = %path.display(), "Feed added");
            feeds.push(feed);
        }
    }
    Ok(feeds)
}
