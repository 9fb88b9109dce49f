//! Feed retrieval: HTTP fetching and RSS/Atom parsing.
//!
//! - [`parser`] - document parsing using the `feed-rs` crate
//! - [`retry`] - exponential backoff schedule for transient failures
//! - [`fetcher`] - conditional GET with per-attempt timeout and bounded retry
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{Fetcher, FetchOptions, FetchOutcome};
//!
//! let fetcher = Fetcher::new(reqwest::Client::new(), FetchOptions::default());
//! match fetcher.fetch(&feed.url, feed.etag.as_deref(), feed.last_modified.as_deref()).await? {
//!     FetchOutcome::Modified(doc) => println!("{} entries", doc.entries.len()),
//!     FetchOutcome::NotModified => println!("unchanged"),
//! }
//! ```

mod fetcher;
mod parser;
mod retry;

pub use fetcher::{ErrorKind, FetchError, FetchOptions, FetchOutcome, FetchedFeed, Fetcher};
pub use parser::{parse_feed, RawEntry};
pub use retry::RetryPolicy;
