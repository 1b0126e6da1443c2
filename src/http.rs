// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};

use crate::error::TransportError;

/// A streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// HTTP response with status, the headers we care about, and body stream
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Type header value, if present
    pub content_type: Option<String>,
    /// Content-Length header value, if present
    pub content_length: Option<u64>,
    /// Response body as a stream of bytes (empty for HEAD requests)
    pub body: ByteStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// A response without a body, as returned for HEAD requests
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            content_length: None,
            body: Box::pin(futures::stream::empty()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body stream into a single buffer
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let mut buffer = BytesMut::new();
        let mut stream = self.body;
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

/// HTTP client abstraction for testability
///
/// Implementations perform exactly one request; retrying is the job of
/// [`RateLimitedFetcher`](crate::RateLimitedFetcher).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue a GET request and return the response with a streaming body
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// Issue a HEAD request to read headers without transferring the body
    async fn head(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Default HTTP client implementation using reqwest
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Idle time after which a stalled transfer counts as timed out
    pub const READ_TIMEOUT: Duration = Duration::from_secs(180);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new ReqwestClient with redirects, timeouts and a user agent set
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("podfetch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

fn header_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

// reqwest reports a zero length for HEAD responses, so read the header directly
fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = header_content_type(response.headers());
        let content_length = header_content_length(response.headers());

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        );

        Ok(HttpResponse {
            status,
            content_type,
            content_length,
            body,
        })
    }

    async fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.head(url).send().await?;

        let mut result = HttpResponse::empty(response.status().as_u16());
        result.content_type = header_content_type(response.headers());
        result.content_length = header_content_length(response.headers());
        Ok(result)
    }
}
