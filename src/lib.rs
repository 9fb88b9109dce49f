//! feedsync: keeps a record store in sync with the RSS/Atom feeds it lists.
//!
//! - [`store`] - the [`FeedStore`](store::FeedStore) trait and its backends
//! - [`feed`] - conditional HTTP fetching with retry, and feed parsing
//! - [`sync`] - fingerprint dedup, the per-feed worker and the scheduler
//! - [`config`] - TOML + environment configuration
//! - [`logging`] - tracing filter setup

pub mod config;
pub mod feed;
pub mod logging;
pub mod store;
pub mod sync;
pub mod util;
