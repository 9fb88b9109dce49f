use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by a [`FeedStore`](super::FeedStore) backend.
///
/// Every variant means the requested read or write did not happen; callers
/// must never treat a `StoreError` as a silent success.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (DNS, connection, TLS, timeout)
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    /// The store answered with a non-success HTTP status
    #[error("Store rejected request: status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The store answered with a body we could not decode
    #[error("Unexpected store response: {0}")]
    Decode(String),

    /// A local database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Login against the store did not yield a token
    #[error("Store authentication failed: {0}")]
    Auth(String),

    /// The configured store base URL is malformed
    #[error("Invalid store URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            StoreError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            StoreError::Unreachable(err.to_string())
        }
    }
}

// ============================================================================
// Fetch Status
// ============================================================================

/// Outcome of the most recent fetch attempt recorded on a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Never fetched since subscription
    #[default]
    Pending,
    Success,
    Failed,
    NotModified,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Pending => "pending",
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
            FetchStatus::NotModified => "not_modified",
        }
    }

    /// Lenient parse: anything unrecognised (including the empty string a
    /// freshly provisioned record carries) is treated as `Pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => FetchStatus::Success,
            "failed" => FetchStatus::Failed,
            "not_modified" => FetchStatus::NotModified,
            _ => FetchStatus::Pending,
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FetchStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(FetchStatus::parse).unwrap_or_default())
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed as stored in the `feeds` collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Feed {
    pub id: String,
    pub url: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub title: String,
    #[serde(default, deserialize_with = "non_empty")]
    pub category: Option<String>,
    /// Cache validator from the previous successful fetch
    #[serde(default, deserialize_with = "non_empty")]
    pub etag: Option<String>,
    /// Cache validator from the previous successful fetch
    #[serde(default, deserialize_with = "non_empty")]
    pub last_modified: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub last_fetched: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fetch_status: FetchStatus,
    #[serde(default, deserialize_with = "non_empty")]
    pub error_message: Option<String>,
}

/// A feed item about to be created in the `feed_items` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewFeedItem {
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub summary: String,
    pub author: String,
    pub image_url: Option<String>,
    pub content_hash: String,
    /// Users who marked the item read; always empty on creation
    pub read_by: Vec<String>,
}

/// HTTP cache validators returned by the origin with a full response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Field changes written to a feed after each fetch attempt.
///
/// `validators` is `None` when the stored cache tokens must be left alone
/// (failure, not-modified). `Some` replaces both stored tokens, and a token
/// the response did not carry is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub fetch_status: FetchStatus,
    pub last_fetched: DateTime<Utc>,
    pub error_message: Option<String>,
    pub validators: Option<CacheValidators>,
}

impl StatusUpdate {
    pub fn success(
        now: DateTime<Utc>,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Self {
        Self {
            fetch_status: FetchStatus::Success,
            last_fetched: now,
            error_message: None,
            validators: Some(CacheValidators {
                etag,
                last_modified,
            }),
        }
    }

    pub fn not_modified(now: DateTime<Utc>) -> Self {
        Self {
            fetch_status: FetchStatus::NotModified,
            last_fetched: now,
            error_message: None,
            validators: None,
        }
    }

    pub fn failed(now: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            fetch_status: FetchStatus::Failed,
            last_fetched: now,
            error_message: Some(message.into()),
            validators: None,
        }
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Record APIs report unset text fields as `""`; fold that into `None`.
fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 as well as the `"2024-01-02 03:04:05.678Z"` layout used
/// by PocketBase date fields. Unparseable or empty values become `None`.
fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_store_timestamp))
}

pub(crate) fn parse_store_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // PocketBase uses a space instead of 'T'
    DateTime::parse_from_rfc3339(&raw.replacen(' ', "T", 1))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fetch_status_roundtrip_strings() {
        for status in [
            FetchStatus::Pending,
            FetchStatus::Success,
            FetchStatus::Failed,
            FetchStatus::NotModified,
        ] {
            assert_eq!(FetchStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_fetch_status_unknown_is_pending() {
        assert_eq!(FetchStatus::parse(""), FetchStatus::Pending);
        assert_eq!(FetchStatus::parse("weird"), FetchStatus::Pending);
    }

    #[test]
    fn test_feed_from_pocketbase_record() {
        let json = r#"{
            "id": "abc123",
            "collectionName": "feeds",
            "url": "https://example.com/rss",
            "title": "Example",
            "category": "",
            "etag": "\"v1\"",
            "last_modified": "",
            "last_fetched": "2024-03-01 10:20:30.000Z",
            "fetch_status": "not_modified",
            "error_message": ""
        }"#;
        let feed: Feed = serde_json::from_str(json).unwrap();

        assert_eq!(feed.id, "abc123");
        assert_eq!(feed.category, None);
        assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(feed.last_modified, None);
        assert_eq!(feed.fetch_status, FetchStatus::NotModified);
        assert_eq!(feed.error_message, None);
        assert_eq!(
            feed.last_fetched,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap())
        );
    }

    #[test]
    fn test_feed_minimal_record_defaults() {
        let json = r#"{"id": "x", "url": "https://example.com/rss", "title": null}"#;
        let feed: Feed = serde_json::from_str(json).unwrap();
        assert_eq!(feed.title, "");
        assert_eq!(feed.fetch_status, FetchStatus::Pending);
        assert_eq!(feed.last_fetched, None);
    }

    #[test]
    fn test_parse_store_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_store_timestamp("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_store_timestamp("2024-01-02 03:04:05Z"), Some(expected));
        assert_eq!(parse_store_timestamp("2024-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_store_timestamp(""), None);
        assert_eq!(parse_store_timestamp("yesterday"), None);
    }

    #[test]
    fn test_failed_update_keeps_validators_unset() {
        let now = Utc::now();
        let update = StatusUpdate::failed(now, "boom");
        assert_eq!(update.fetch_status, FetchStatus::Failed);
        assert_eq!(update.error_message.as_deref(), Some("boom"));
        assert!(update.validators.is_none());
    }

    #[test]
    fn test_success_update_replaces_validators() {
        let update = StatusUpdate::success(Utc::now(), None, Some("lm".to_string()));
        assert_eq!(
            update.validators,
            Some(CacheValidators {
                etag: None,
                last_modified: Some("lm".to_string()),
            })
        );
    }
}
