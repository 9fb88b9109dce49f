//! Access to the record store that owns feeds and feed items.
//!
//! The sync engine never holds authoritative state; everything it reads and
//! writes goes through the [`FeedStore`] trait. Two backends are provided:
//!
//! - [`RecordStore`] - HTTP client for a PocketBase-style collection API
//! - [`SqliteStore`] - local SQLite database with the same two tables

mod record;
mod sqlite;
mod types;

use async_trait::async_trait;
use std::collections::HashSet;

pub use record::RecordStore;
pub use sqlite::SqliteStore;
pub use types::{CacheValidators, Feed, FetchStatus, NewFeedItem, StatusUpdate, StoreError};

/// CRUD/query surface the sync engine needs from a store.
///
/// Implementations must be safe to share between concurrently running feed
/// workers (`Send + Sync`, typically behind an `Arc`).
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Every subscribed feed.
    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError>;

    /// Fingerprints of all items already stored for `feed_id`.
    async fn existing_hashes(&self, feed_id: &str) -> Result<HashSet<String>, StoreError>;

    /// Creates one feed item.
    async fn insert_feed_item(&self, item: &NewFeedItem) -> Result<(), StoreError>;

    /// Records the outcome of a fetch attempt on a feed.
    async fn update_feed_status(&self, feed_id: &str, update: &StatusUpdate)
        -> Result<(), StoreError>;
}
