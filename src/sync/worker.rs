use chrono::Utc;

use super::dedup::{filter_new, NewEntry};
use crate::feed::{FetchOutcome, Fetcher};
use crate::store::{Feed, FeedStore, NewFeedItem, StatusUpdate};

/// How a single feed's ingestion ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Document fetched and parsed; new items (possibly none) written
    Succeeded,
    /// Origin answered 304
    NotModified,
    /// Fetch, parse or fingerprint query failed; the message is what was
    /// stored as the feed's `error_message`
    Failed(String),
}

/// Result of one worker run, consumed by the cycle summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub feed_id: String,
    pub outcome: IngestOutcome,
    pub inserted: usize,
    pub insert_failures: usize,
    /// The final status write was rejected by the store
    pub status_write_failed: bool,
}

impl IngestReport {
    fn new(feed_id: &str, outcome: IngestOutcome) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            outcome,
            inserted: 0,
            insert_failures: 0,
            status_write_failed: false,
        }
    }
}

/// Fetches one feed, stores its new entries and records the outcome on the
/// feed.
///
/// Never fails: every error is contained to this feed and surfaced through
/// its stored `fetch_status`/`error_message` and the returned report.
pub async fn ingest_feed(store: &dyn FeedStore, fetcher: &Fetcher, feed: &Feed) -> IngestReport {
    let fetched = fetcher
        .fetch(
            &feed.url,
            feed.etag.as_deref(),
            feed.last_modified.as_deref(),
        )
        .await;

    let (mut report, update) = match fetched {
        Ok(FetchOutcome::NotModified) => {
            tracing::debug!(feed_id = %feed.id, url = %feed.url, "Feed not modified");
            (
                IngestReport::new(&feed.id, IngestOutcome::NotModified),
                StatusUpdate::not_modified(Utc::now()),
            )
        }
        Ok(FetchOutcome::Modified(doc)) => match filter_new(store, &feed.id, doc.entries).await {
            Ok(fresh) => {
                let mut report = IngestReport::new(&feed.id, IngestOutcome::Succeeded);
                insert_all(store, &feed.id, fresh, &mut report).await;
                (
                    report,
                    StatusUpdate::success(Utc::now(), doc.etag, doc.last_modified),
                )
            }
            Err(e) => {
                let message = format!("store error: {}", e);
                tracing::warn!(
                    feed_id = %feed.id,
                    error = %e,
                    "Failed to query existing items"
                );
                (
                    IngestReport::new(&feed.id, IngestOutcome::Failed(message.clone())),
                    StatusUpdate::failed(Utc::now(), message),
                )
            }
        },
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(
                feed_id = %feed.id,
                url = %feed.url,
                kind = ?e.kind(),
                error = %e,
                "Feed fetch failed"
            );
            (
                IngestReport::new(&feed.id, IngestOutcome::Failed(message.clone())),
                StatusUpdate::failed(Utc::now(), message),
            )
        }
    };

    if let Err(e) = store.update_feed_status(&feed.id, &update).await {
        tracing::warn!(
            feed_id = %feed.id,
            status = %update.fetch_status,
            error = %e,
            "Failed to update feed status"
        );
        report.status_write_failed = true;
    }

    report
}

/// Writes each entry independently; a rejected insert is counted and does
/// not stop the rest.
async fn insert_all(
    store: &dyn FeedStore,
    feed_id: &str,
    fresh: Vec<NewEntry>,
    report: &mut IngestReport,
) {
    for new in fresh {
        let item = to_feed_item(feed_id, new);
        match store.insert_feed_item(&item).await {
            Ok(()) => report.inserted += 1,
            Err(e) => {
                report.insert_failures += 1;
                tracing::warn!(
                    feed_id = %feed_id,
                    link = %item.link,
                    error = %e,
                    "Failed to insert feed item"
                );
            }
        }
    }
}

fn to_feed_item(feed_id: &str, new: NewEntry) -> NewFeedItem {
    let NewEntry {
        entry,
        content_hash,
    } = new;
    NewFeedItem {
        feed_id: feed_id.to_string(),
        title: entry.title,
        link: entry.link,
        published: entry.published.or(entry.updated),
        summary: entry.summary,
        author: entry.author,
        image_url: entry.image_url.filter(|u| !u.is_empty()),
        content_hash,
        read_by: Vec::new(),
    }
}
