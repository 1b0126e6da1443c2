// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{NetworkError, TransportError};
use crate::http::{HttpClient, HttpResponse};

/// Retry configuration for network requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts before giving up
    pub max_attempts: u32,
    /// Delay unit; attempt `n` is followed by a sleep of `base_delay * n`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(30);

    /// Backoff after the given (1-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Self::DEFAULT_BASE_DELAY,
        }
    }
}

/// Wraps an [`HttpClient`] with bounded, linearly backed-off retries
///
/// Only transport failures are retried. HTTP error statuses are returned to
/// the caller untouched, since what they mean depends on the request.
pub struct RateLimitedFetcher<C> {
    client: C,
    policy: RetryPolicy,
}

impl<C: HttpClient> RateLimitedFetcher<C> {
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Perform a GET (or HEAD when `head_only` is set), retrying transient failures
    pub async fn fetch(&self, url: &str, head_only: bool) -> Result<HttpResponse, NetworkError> {
        let url = url.trim();
        self.with_retry(url, || async move {
            if head_only {
                self.client.head(url).await
            } else {
                self.client.get(url).await
            }
        })
        .await
    }

    /// GET a whole document, reading the body inside the retry loop
    ///
    /// Returns the status alongside the body so callers can reject error pages.
    pub async fn fetch_bytes(&self, url: &str) -> Result<(u16, Bytes), NetworkError> {
        let url = url.trim();
        self.with_retry(url, || async move {
            let response = self.client.get(url).await?;
            let status = response.status;
            let body = response.bytes().await?;
            Ok((status, body))
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, mut operation: F) -> Result<T, NetworkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(url, attempts = attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    return Err(NetworkError::Request {
                        url: url.to_string(),
                        source: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(NetworkError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        url,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::error::TransportErrorKind;

    /// Fails with the given kind a fixed number of times, then answers 200
    struct FlakyClient {
        failures: u32,
        kind: TransportErrorKind,
        calls: AtomicU32,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl FlakyClient {
        fn new(failures: u32, kind: TransportErrorKind) -> Self {
            Self {
                failures,
                kind,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, url: &str, head: bool) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push((url.to_string(), head));
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(TransportError::new(self.kind, format!("failure {call}")));
            }
            let mut response = HttpResponse::empty(200);
            if !head {
                response.body = Box::pin(futures::stream::once(async {
                    Ok(Bytes::from_static(b"<rss/>"))
                }));
            }
            Ok(response)
        }
    }

    #[async_trait]
    impl HttpClient for FlakyClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
            self.respond(url, false)
        }

        async fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
            self.respond(url, true)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(30),
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(150));
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.base_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn succeeds_after_fewer_failures_than_max_attempts() {
        let fetcher = RateLimitedFetcher::new(FlakyClient::new(3, TransportErrorKind::Timeout), policy(5));

        let response = fetcher.fetch("https://example.com/ep.mp3", false).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(fetcher.client().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let fetcher = RateLimitedFetcher::new(FlakyClient::new(10, TransportErrorKind::Connect), policy(4));

        let err = fetcher.fetch("https://example.com/ep.mp3", false).await.unwrap_err();

        match err {
            NetworkError::RetriesExhausted { attempts, source, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(source.to_string(), "failure 4");
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(fetcher.client().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failing_exactly_max_attempts_times_is_an_error() {
        let fetcher = RateLimitedFetcher::new(FlakyClient::new(3, TransportErrorKind::Body), policy(3));

        assert!(fetcher.fetch("https://example.com/ep.mp3", true).await.is_err());
        assert_eq!(fetcher.client().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let fetcher = RateLimitedFetcher::new(FlakyClient::new(5, TransportErrorKind::Other), policy(10));

        let err = fetcher.fetch("not a url", false).await.unwrap_err();

        assert!(matches!(err, NetworkError::Request { .. }));
        assert_eq!(fetcher.client().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn head_only_issues_head_requests_with_trimmed_url() {
        let fetcher = RateLimitedFetcher::new(FlakyClient::new(0, TransportErrorKind::Timeout), policy(1));

        fetcher.fetch("  https://example.com/ep.mp3\n", true).await.unwrap();

        let seen = fetcher.client().seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("https://example.com/ep.mp3".to_string(), true)]);
    }

    #[tokio::test]
    async fn fetch_bytes_reads_body_within_retry() {
        let fetcher = RateLimitedFetcher::new(FlakyClient::new(1, TransportErrorKind::Timeout), policy(2));

        let (status, body) = fetcher.fetch_bytes("https://example.com/feed.xml").await.unwrap();

        assert_eq!(status, 200);
        assert_eq!(body, Bytes::from_static(b"<rss/>"));
    }
}
