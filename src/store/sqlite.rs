use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use super::types::{Feed, FetchStatus, NewFeedItem, StatusUpdate, StoreError};
use super::FeedStore;

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, FromRow)]
struct FeedDbRow {
    id: String,
    url: String,
    title: String,
    category: Option<String>,
    etag: Option<String>,
    last_modified: Option<String>,
    last_fetched: Option<i64>,
    fetch_status: String,
    error_message: Option<String>,
}

impl FeedDbRow {
    fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            url: self.url,
            title: self.title,
            category: self.category,
            etag: self.etag,
            last_modified: self.last_modified,
            last_fetched: self.last_fetched.and_then(from_epoch),
            fetch_status: FetchStatus::parse(&self.fetch_status),
            error_message: self.error_message,
        }
    }
}

#[derive(Debug, FromRow)]
struct ItemDbRow {
    feed_id: String,
    title: String,
    link: String,
    published: Option<i64>,
    summary: String,
    author: String,
    image_url: Option<String>,
    content_hash: String,
    read_by: String,
}

impl ItemDbRow {
    fn into_item(self) -> NewFeedItem {
        NewFeedItem {
            feed_id: self.feed_id,
            title: self.title,
            link: self.link,
            published: self.published.and_then(from_epoch),
            summary: self.summary,
            author: self.author,
            image_url: self.image_url,
            content_hash: self.content_hash,
            read_by: serde_json::from_str(&self.read_by).unwrap_or_default(),
        }
    }
}

fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

// ============================================================================
// Store
// ============================================================================

/// Local SQLite backend with the same `feeds` / `feed_items` layout as the
/// remote record store.
///
/// `UNIQUE(feed_id, content_hash)` backs the deduplication invariant at the
/// storage level, so a racing duplicate insert is rejected rather than
/// silently stored twice.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// `":memory:"` yields a private in-memory database shared by the pool's
    /// connections.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: concurrent feed workers contend for the single
        // SQLite writer; wait for the lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes inside one transaction. Idempotent.
    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(8)))),
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                category TEXT,
                etag TEXT,
                last_modified TEXT,
                last_fetched INTEGER,
                fetch_status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_items (
                id INTEGER PRIMARY KEY,
                feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                published INTEGER,
                summary TEXT NOT NULL,
                author TEXT NOT NULL,
                image_url TEXT,
                content_hash TEXT NOT NULL,
                read_by TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                UNIQUE(feed_id, content_hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_items_feed ON feed_items(feed_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_items_published ON feed_items(published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe to a feed, returning its id.
    ///
    /// Re-subscribing an existing URL updates its title and category and
    /// returns the original id; fetch state is left alone.
    pub async fn insert_feed(
        &self,
        url: &str,
        title: &str,
        category: Option<&str>,
    ) -> Result<String, StoreError> {
        let (id,): (String,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, category)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                category = excluded.category
            RETURNING id
        "#,
        )
        .bind(url)
        .bind(title)
        .bind(category)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_feed(&self, feed_id: &str) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT id, url, title, category, etag, last_modified,
                   last_fetched, fetch_status, error_message
            FROM feeds WHERE id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Items stored for a feed in insertion order.
    pub async fn items_for_feed(&self, feed_id: &str) -> Result<Vec<NewFeedItem>, StoreError> {
        let rows: Vec<ItemDbRow> = sqlx::query_as(
            r#"
            SELECT feed_id, title, link, published, summary, author,
                   image_url, content_hash, read_by
            FROM feed_items WHERE feed_id = ?
            ORDER BY id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }
}

#[async_trait]
impl FeedStore for SqliteStore {
    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT id, url, title, category, etag, last_modified,
                   last_fetched, fetch_status, error_message
            FROM feeds
            ORDER BY title, url
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    async fn existing_hashes(&self, feed_id: &str) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT content_hash FROM feed_items WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(hash,)| hash).collect())
    }

    async fn insert_feed_item(&self, item: &NewFeedItem) -> Result<(), StoreError> {
        let read_by = serde_json::to_string(&item.read_by)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO feed_items (
                feed_id, title, link, published, summary, author,
                image_url, content_hash, read_by, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&item.feed_id)
        .bind(&item.title)
        .bind(&item.link)
        .bind(item.published.map(|p| p.timestamp()))
        .bind(&item.summary)
        .bind(&item.author)
        .bind(&item.image_url)
        .bind(&item.content_hash)
        .bind(read_by)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_feed_status(
        &self,
        feed_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        // Stored validators are only touched when the update replaces them
        let replace = update.validators.is_some();
        let (etag, last_modified) = match &update.validators {
            Some(v) => (v.etag.as_deref(), v.last_modified.as_deref()),
            None => (None, None),
        };
        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                fetch_status = ?,
                last_fetched = ?,
                error_message = ?,
                etag = CASE WHEN ? THEN ? ELSE etag END,
                last_modified = CASE WHEN ? THEN ? ELSE last_modified END
            WHERE id = ?
        "#,
        )
        .bind(update.fetch_status.as_str())
        .bind(update.last_fetched.timestamp())
        .bind(&update.error_message)
        .bind(replace)
        .bind(etag)
        .bind(replace)
        .bind(last_modified)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("feed {} not found", feed_id),
            });
        }
        Ok(())
    }
}
