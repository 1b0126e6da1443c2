// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failed HTTP exchange, used to decide on retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection could not be established (DNS, refused, TLS handshake)
    Connect,
    /// The request or a read timed out
    Timeout,
    /// The connection broke while the body was being transferred
    Body,
    /// Anything else (invalid URL, redirect loop, decoding)
    Other,
}

/// A failure below the HTTP status level, reported by an [`HttpClient`](crate::HttpClient)
#[derive(Error, Debug)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Connection, timeout and interrupted-body failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Other)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        use std::error::Error as _;

        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_request() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };

        // reqwest hides the interesting part (e.g. the TLS failure) in the source chain
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self { kind, message }
    }
}

/// Errors raised by the retrying fetcher
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection to {url} was limited/refused after {attempts} attempts: {source}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: TransportError,
    },
}

/// Errors that can occur when fetching or parsing a podcast feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Feed URL '{0}' is not an http(s) URL")]
    UnsupportedScheme(String),

    #[error("Could not download feed from {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Could not download feed from {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Feed at {url} is malformed: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Feed at {0} has no usable title")]
    MissingTitle(String),

    #[error("Failed to create podcast directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that make a single episode unresolvable
#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error("No download link found for episode '{title}' in podcast '{podcast}'")]
    NoDownloadLink { title: String, podcast: String },

    #[error("Could not determine content type of episode '{title}' in podcast '{podcast}': {source}")]
    Network {
        title: String,
        podcast: String,
        #[source]
        source: NetworkError,
    },

    #[error("Server did not report a content type for episode '{title}' in podcast '{podcast}'")]
    UnknownContentType { title: String, podcast: String },

    #[error("HTTP error {status} while checking episode '{title}' in podcast '{podcast}'")]
    HeadStatus {
        title: String,
        podcast: String,
        status: u16,
    },

    #[error("Cannot determine filename for episode '{title}' with codec {content_type}")]
    UnsupportedContentType { title: String, content_type: String },
}

/// Errors that can occur while materializing an episode on disk
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download of {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to move finished download to {path}: {source}")]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while writing tags; these never fail an episode
#[derive(Error, Debug)]
pub enum TagError {
    #[error("Tagging of {path} is not supported")]
    Unsupported { path: PathBuf },

    #[error("Failed to write ID3 tags to {path}: {source}")]
    Id3 {
        path: PathBuf,
        #[source]
        source: id3::Error,
    },

    #[error("Failed to write MP4 tags to {path}: {source}")]
    Mp4 {
        path: PathBuf,
        #[source]
        source: mp4ameta::Error,
    },
}

/// Errors that can occur during the post-hoc integrity check
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Could not check size of {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("HTTP error {status} while checking {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Server did not report a content length for {0}")]
    MissingContentLength(String),

    #[error("Failed to inspect {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when loading feed lists from files
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read feed list {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse OPML file {path}: {source}")]
    OpmlParseFailed {
        path: PathBuf,
        #[source]
        source: quick_xml::de::DeError,
    },
}

/// Errors that can occur when scanning the destination directory
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when writing playlist files
#[derive(Error, Debug)]
#[error("Failed to write playlist {path}: {source}")]
pub struct PlaylistError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Errors that abort a whole run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Failed to write report {path}: {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
