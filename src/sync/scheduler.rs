use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::worker::{ingest_feed, IngestOutcome, IngestReport};
use crate::feed::Fetcher;
use crate::store::{FeedStore, StoreError};

/// Timing and concurrency settings for [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Target time between cycle starts
    pub interval: Duration,
    /// Maximum number of feed workers in flight
    pub max_concurrency: usize,
    /// No new worker is dispatched once this much of the cycle has elapsed
    pub cycle_deadline: Option<Duration>,
    /// Minimum gap between two consecutive dispatches
    pub dispatch_spacing: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_concurrency: 8,
            cycle_deadline: None,
            dispatch_spacing: Duration::ZERO,
        }
    }
}

/// Tally of one pass over all feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feeds: usize,
    pub succeeded: usize,
    pub not_modified: usize,
    pub failed: usize,
    /// Feeds never dispatched because of cancellation or the cycle deadline
    pub skipped: usize,
    pub inserted: usize,
    pub insert_failures: usize,
    pub status_write_failures: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    fn record(&mut self, report: Option<IngestReport>) {
        let Some(report) = report else {
            self.skipped += 1;
            return;
        };
        match report.outcome {
            IngestOutcome::Succeeded => self.succeeded += 1,
            IngestOutcome::NotModified => self.not_modified += 1,
            IngestOutcome::Failed(_) => self.failed += 1,
        }
        self.inserted += report.inserted;
        self.insert_failures += report.insert_failures;
        if report.status_write_failed {
            self.status_write_failures += 1;
        }
    }
}

/// Periodically refreshes every feed in the store.
///
/// Each cycle lists the feeds, runs one [`ingest_feed`] per feed with at
/// most `max_concurrency` in flight, then sleeps for whatever remains of
/// the interval. The scheduler itself never writes to the store.
pub struct Scheduler {
    store: Arc<dyn FeedStore>,
    fetcher: Fetcher,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(store: Arc<dyn FeedStore>, fetcher: Fetcher, options: SchedulerOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    /// Runs cycles until `cancel` fires.
    ///
    /// A cycle whose feed listing fails is skipped and retried after the
    /// normal interval. Cancellation interrupts the sleep between cycles
    /// and stops dispatch within a cycle; in-flight workers finish first.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.options.interval.as_secs(),
            max_concurrency = self.options.max_concurrency,
            "Scheduler started"
        );

        while !cancel.is_cancelled() {
            let started = Instant::now();

            match self.run_cycle(&cancel).await {
                Ok(report) => tracing::info!(
                    feeds = report.feeds,
                    succeeded = report.succeeded,
                    not_modified = report.not_modified,
                    failed = report.failed,
                    skipped = report.skipped,
                    inserted = report.inserted,
                    insert_failures = report.insert_failures,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Sync cycle complete"
                ),
                Err(e) => tracing::error!(error = %e, "Failed to list feeds, skipping cycle"),
            }

            let wait = self.options.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// One pass over every feed.
    ///
    /// # Errors
    ///
    /// Only a failure to list feeds is an error; per-feed failures are
    /// counted in the report.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, StoreError> {
        let started = Instant::now();
        let feeds = self.store.list_feeds().await?;
        let total = feeds.len();

        let deadline = self.options.cycle_deadline.map(|d| started + d);
        let spacing = self.options.dispatch_spacing;
        let halted = move || cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d);

        let reports: Vec<Option<IngestReport>> = stream::iter(feeds.into_iter().enumerate())
            .then(|(idx, feed)| async move {
                if idx > 0 && !spacing.is_zero() && !halted() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(spacing) => {}
                    }
                }
                feed
            })
            .map(|feed| {
                let store = Arc::clone(&self.store);
                let fetcher = &self.fetcher;
                async move {
                    if halted() {
                        tracing::debug!(feed_id = %feed.id, "Cycle halted, feed not dispatched");
                        return None;
                    }
                    Some(ingest_feed(store.as_ref(), fetcher, &feed).await)
                }
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = CycleReport {
            feeds: total,
            ..CycleReport::default()
        };
        for r in reports {
            report.record(r);
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }
}
