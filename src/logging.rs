//! Tracing setup.
//!
//! The subscriber is installed before the config file is read so that
//! warnings raised while loading it are not dropped. The configured
//! `log_level` is swapped in afterwards through a reload handle, unless
//! `RUST_LOG` already chose the filter.

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{reload, EnvFilter};

#[derive(Debug, Error)]
pub enum LogFilterError {
    #[error("Invalid log filter '{directive}': {source}")]
    Parse {
        directive: String,
        #[source]
        source: ParseError,
    },

    #[error("Failed to swap log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Filter to run with until config is loaded: `RUST_LOG` when it is set and
/// valid, otherwise `info`. The flag is true when `RUST_LOG` supplied it.
pub fn startup_filter() -> (EnvFilter, bool) {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new("info"), false),
    }
}

/// Replaces the running filter with `directive`.
pub fn apply_log_level<S>(
    handle: &reload::Handle<EnvFilter, S>,
    directive: &str,
) -> Result<(), LogFilterError> {
    let filter = EnvFilter::try_new(directive).map_err(|source| LogFilterError::Parse {
        directive: directive.to_string(),
        source,
    })?;
    handle.reload(filter)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::prelude::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_warnings_reach_subscriber_installed_first() {
        let out = Captured::default();
        let writer = out.clone();
        let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );

        let path = std::env::temp_dir().join(format!(
            "feedsync_logging_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "log_level = \"warn\"\nstore_urll = \"typo\"\n").unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let config = Config::load(&path).unwrap();
            apply_log_level(&handle, &config.log_level).unwrap();
            tracing::info!("quiet after swap");
            tracing::warn!("loud after swap");
        });
        let _ = std::fs::remove_file(&path);

        let text = out.text();
        assert!(text.contains("Unknown key in config file"), "{}", text);
        assert!(text.contains("store_urll"), "{}", text);
        assert!(!text.contains("quiet after swap"), "{}", text);
        assert!(text.contains("loud after swap"), "{}", text);
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let (_filter, handle) =
            reload::Layer::<EnvFilter, tracing_subscriber::Registry>::new(EnvFilter::new("info"));
        let err = apply_log_level(&handle, "feedsync=notalevel").unwrap_err();
        assert!(matches!(err, LogFilterError::Parse { .. }));
    }
}
