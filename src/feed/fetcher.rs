use futures::StreamExt;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::parser::{parse_feed, RawEntry};
use super::retry::RetryPolicy;
use crate::util::{validate_feed_url, UrlValidationError};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Broad classification of a fetch failure, used for retry decisions and
/// for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, connection failures, 5xx: worth retrying
    Transient,
    /// Malformed URL, 4xx: retrying will not help
    Permanent,
    /// The origin answered but the document is not a feed
    Parse,
}

/// Errors that can occur while fetching a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status other than 2xx/304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// A single attempt exceeded the per-fetch timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Feed URL rejected before any request was made
    #[error("{0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Every attempt failed with a transient error; holds the last one
    #[error("{source} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(e) if e.is_builder() || e.is_redirect() => ErrorKind::Permanent,
            FetchError::Network(_)
            | FetchError::Timeout
            | FetchError::IncompleteResponse { .. }
            | FetchError::RetriesExhausted { .. } => ErrorKind::Transient,
            FetchError::HttpStatus(status) => {
                if *status >= 500 || *status == 429 || *status == 408 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            FetchError::InvalidUrl(_) | FetchError::ResponseTooLarge => ErrorKind::Permanent,
            FetchError::Parse(_) => ErrorKind::Parse,
        }
    }

    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::RetriesExhausted { .. }) && self.kind() == ErrorKind::Transient
    }
}

/// A feed document that changed since the validators we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub entries: Vec<RawEntry>,
    /// `ETag` returned with this response, if any
    pub etag: Option<String>,
    /// `Last-Modified` returned with this response, if any
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Modified(FetchedFeed),
    /// Origin answered 304; nothing to parse
    NotModified,
}

/// Settings for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub retry: RetryPolicy,
    /// Bound on one attempt, from sending the request to the last body byte
    pub timeout: Duration,
    pub user_agent: String,
    pub block_private_hosts: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("feedsync/", env!("CARGO_PKG_VERSION")).to_string(),
            block_private_hosts: false,
        }
    }
}

/// Retrieves and parses feed documents with conditional requests and
/// bounded retry.
///
/// Cheap to clone; clones share the connection pool of the wrapped
/// `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetches `url`, sending `If-None-Match` / `If-Modified-Since` when the
    /// previous validators are known.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - URL rejected up front, no request made
    /// - [`FetchError::HttpStatus`] - 4xx other than 408/429, no retry
    /// - [`FetchError::Parse`] - document is not a feed, no retry
    /// - [`FetchError::RetriesExhausted`] - every attempt hit a transient
    ///   failure (timeout, connection error, 5xx, 429, truncated body)
    pub async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = validate_feed_url(url, self.options.block_private_hosts)?;
        let policy = self.options.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match self.attempt(&url, etag, last_modified).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                tracing::debug!(
                    url = %url,
                    attempts = attempt,
                    error = %error,
                    "Giving up after transient failures"
                );
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = policy.next_delay(attempt - 1);
            tracing::debug!(
                url = %url,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient fetch failure, retrying after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One request/response exchange bounded by the per-attempt timeout.
    async fn attempt(
        &self,
        url: &Url,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.options.user_agent);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                return Ok(FetchOutcome::NotModified);
            }
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let etag = header_string(&response, ETAG);
            let last_modified = header_string(&response, LAST_MODIFIED);
            let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
            let entries = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

            Ok::<_, FetchError>(FetchOutcome::Modified(FetchedFeed {
                entries,
                etag,
                last_modified,
            }))
        };

        tokio::time::timeout(self.options.timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

fn header_string(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Network interruptions can end the stream early without an error
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
