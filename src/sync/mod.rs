//! The ingestion engine.
//!
//! - [`dedup`] - content fingerprints and filtering of already-stored entries
//! - [`worker`] - fetch, dedup, insert and status update for one feed
//! - [`scheduler`] - periodic cycles over all feeds with bounded concurrency

mod dedup;
mod scheduler;
mod worker;

pub use dedup::{filter_new, fingerprint, select_new, NewEntry};
pub use scheduler::{CycleReport, Scheduler, SchedulerOptions};
pub use worker::{ingest_feed, IngestOutcome, IngestReport};
