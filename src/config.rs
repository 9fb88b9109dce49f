//! Configuration for the feedsync daemon.
//!
//! Settings come from an optional TOML file (a missing or empty file yields
//! `Config::default()`), then `FEEDSYNC_*` environment variables override
//! individual keys, then the result is validated. Unknown file keys are
//! accepted but logged as a warning, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchOptions, RetryPolicy};
use crate::sync::SchedulerOptions;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Which [`FeedStore`](crate::store::FeedStore) backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Remote PocketBase-style record API
    #[default]
    Record,
    /// Local SQLite database
    Sqlite,
}

/// Top-level daemon configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// Custom Debug impl masks `store_token` and `admin_password`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_backend: StoreBackend,

    /// Base URL of the record API (record backend).
    pub store_url: String,

    /// Database file path (sqlite backend). `":memory:"` is accepted.
    pub sqlite_path: String,

    /// Pre-issued bearer token for the record API.
    pub store_token: Option<String>,

    /// Admin identity used to log in when no token is configured.
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,

    /// Target seconds between cycle starts.
    pub poll_interval_secs: u64,

    /// Maximum number of feeds refreshed at once.
    pub max_concurrency: usize,

    /// Total fetch tries per feed per cycle, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,

    /// Bound on one fetch attempt.
    pub fetch_timeout_secs: u64,

    /// Bound on one store request.
    pub store_timeout_secs: u64,

    /// Stop dispatching new feeds this many seconds into a cycle.
    pub cycle_deadline_secs: Option<u64>,

    /// Minimum gap between two feed dispatches.
    pub dispatch_spacing_ms: u64,

    /// Reject feed URLs pointing at loopback, private or link-local hosts.
    pub block_private_hosts: bool,

    pub user_agent: String,

    /// Default tracing directive, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Record,
            store_url: "http://127.0.0.1:8090".to_string(),
            sqlite_path: "feedsync.db".to_string(),
            store_token: None,
            admin_email: None,
            admin_password: None,
            poll_interval_secs: 300,
            max_concurrency: 8,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            fetch_timeout_secs: 30,
            store_timeout_secs: 15,
            cycle_deadline_secs: None,
            dispatch_spacing_ms: 0,
            block_private_hosts: false,
            user_agent: FetchOptions::default().user_agent,
            log_level: "info".to_string(),
        }
    }
}

/// Mask secrets in Debug output to prevent leakage into logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store_backend", &self.store_backend)
            .field("store_url", &self.store_url)
            .field("sqlite_path", &self.sqlite_path)
            .field("store_token", &self.store_token.as_ref().map(|_| "[REDACTED]"))
            .field("admin_email", &self.admin_email)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_concurrency", &self.max_concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_cap_ms", &self.backoff_cap_ms)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("store_timeout_secs", &self.store_timeout_secs)
            .field("cycle_deadline_secs", &self.cycle_deadline_secs)
            .field("dispatch_spacing_ms", &self.dispatch_spacing_ms)
            .field("block_private_hosts", &self.block_private_hosts)
            .field("user_agent", &self.user_agent)
            .field("log_level", &self.log_level)
            .finish()
    }
}

const KNOWN_KEYS: [&str; 18] = [
    "store_backend",
    "store_url",
    "sqlite_path",
    "store_token",
    "admin_email",
    "admin_password",
    "poll_interval_secs",
    "max_concurrency",
    "max_attempts",
    "backoff_base_ms",
    "backoff_cap_ms",
    "fetch_timeout_secs",
    "store_timeout_secs",
    "cycle_deadline_secs",
    "dispatch_spacing_ms",
    "block_private_hosts",
    "user_agent",
    "log_level",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), backend = ?config.store_backend, "Loaded configuration");
        Ok(config)
    }

    /// Full startup resolution: file, then process environment, then
    /// validation.
    pub fn resolve(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides keys from `FEEDSYNC_*` variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FEEDSYNC_STORE_URL") {
            self.store_url = v;
        }
        if let Some(v) = lookup("FEEDSYNC_STORE_TOKEN") {
            self.store_token = Some(v);
        }
        if let Some(v) = lookup("FEEDSYNC_ADMIN_EMAIL") {
            self.admin_email = Some(v);
        }
        if let Some(v) = lookup("FEEDSYNC_ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        if let Some(v) = lookup("FEEDSYNC_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_env("FEEDSYNC_POLL_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("FEEDSYNC_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("FEEDSYNC_MAX_CONCURRENCY", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_base_ms ({}) exceeds backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "store_timeout_secs must be at least 1".to_string(),
            ));
        }
        match self.store_backend {
            StoreBackend::Record if self.store_url.trim().is_empty() => Err(
                ConfigError::Invalid("store_url is required for the record backend".to_string()),
            ),
            StoreBackend::Sqlite if self.sqlite_path.trim().is_empty() => Err(
                ConfigError::Invalid("sqlite_path is required for the sqlite backend".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn store_token(&self) -> Option<SecretString> {
        self.store_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
    }

    /// Admin identity and password, when both are configured.
    pub fn admin_credentials(&self) -> Option<(String, SecretString)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) if !email.is_empty() => {
                Some((email.clone(), SecretString::from(password.clone())))
            }
            _ => None,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base: Duration::from_millis(self.backoff_base_ms),
                cap: Duration::from_millis(self.backoff_cap_ms),
            },
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            user_agent: self.user_agent.clone(),
            block_private_hosts: self.block_private_hosts,
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_concurrency: self.max_concurrency,
            cycle_deadline: self.cycle_deadline_secs.map(Duration::from_secs),
            dispatch_spacing: Duration::from_millis(self.dispatch_spacing_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}

// ============================================================================
// Tests
// ============================================================================
