use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use feedsync::config::{Config, StoreBackend};
use feedsync::feed::Fetcher;
use feedsync::logging;
use feedsync::store::{FeedStore, RecordStore, SqliteStore};
use feedsync::sync::Scheduler;

#[derive(Parser, Debug)]
#[command(
    name = "feedsync",
    version,
    about = "Keeps a record store in sync with RSS/Atom feeds"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "./feedsync.toml")]
    config: PathBuf,

    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let (filter, from_env) = logging::startup_filter();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_filter_reloading();
    let log_filter = subscriber.reload_handle();
    subscriber.init();

    let args = Args::parse();

    let config = Config::resolve(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // RUST_LOG wins over log_level
    if !from_env {
        logging::apply_log_level(&log_filter, &config.log_level)?;
    }

    tracing::debug!(config = ?config, "Resolved configuration");

    let store = open_store(&config).await?;

    // Per-attempt deadlines are enforced by the fetcher itself
    let fetch_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.fetch_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = Fetcher::new(fetch_client, config.fetch_options());

    let scheduler = Scheduler::new(store, fetcher, config.scheduler_options());
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    if args.once {
        let report = scheduler
            .run_cycle(&cancel)
            .await
            .context("Failed to list feeds")?;
        tracing::info!(
            feeds = report.feeds,
            succeeded = report.succeeded,
            not_modified = report.not_modified,
            failed = report.failed,
            skipped = report.skipped,
            inserted = report.inserted,
            insert_failures = report.insert_failures,
            "Single sync cycle complete"
        );
    } else {
        scheduler.run(cancel).await;
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn FeedStore>> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            let store = SqliteStore::open(&config.sqlite_path)
                .await
                .with_context(|| format!("Failed to open database at {}", config.sqlite_path))?;
            tracing::info!(path = %config.sqlite_path, "Using SQLite store");
            let store: Arc<dyn FeedStore> = Arc::new(store);
            Ok(store)
        }
        StoreBackend::Record => {
            let client = reqwest::Client::builder()
                .timeout(config.store_timeout())
                .build()
                .context("Failed to build store HTTP client")?;

            let token = match (config.store_token(), config.admin_credentials()) {
                (Some(token), _) => Some(token),
                (None, Some((identity, password))) => Some(
                    RecordStore::login(&client, &config.store_url, &identity, &password)
                        .await
                        .context("Failed to authenticate against record store")?,
                ),
                (None, None) => {
                    tracing::warn!(
                        "No store token or admin credentials configured, using anonymous access"
                    );
                    None
                }
            };

            let store = RecordStore::new(client, &config.store_url, token)
                .context("Invalid store_url")?;
            tracing::info!(url = %config.store_url, "Using record store");
            let store: Arc<dyn FeedStore> = Arc::new(store);
            Ok(store)
        }
    }
}

/// Cancels `token` on SIGINT or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested, finishing in-flight feeds");
    token.cancel();
}
