//! Logging Setup
//!
//! Layered `tracing` initialization for connector embedders: a rolling file
//! appender behind a non-blocking writer, JSON-formatted when structured log
//! shipping is wanted, otherwise plain text plus a stdout mirror. Returns
//! the appender's [`WorkerGuard`]; buffered lines are flushed when it drops,
//! so hold it for the process lifetime.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        // Anything else, including "never", means one unrotated file
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    }
}

/// `RUST_LOG` wins when set; otherwise the config drives the filter, with
/// this crate's own spans silenced when tracing is disabled
fn level_filter(config: &AppConfig) -> EnvFilter {
    let configured = if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!("{},dataspace_transfer=off", config.log_level)
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
}

/// Install the global tracing subscriber per `config`.
///
/// Fails if a global subscriber is already installed, which embedders that
/// bring their own subscriber should treat as a configuration error.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));
    let registry = tracing_subscriber::registry().with(level_filter(config));

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .with(fmt::layer().with_target(false).with_ansi(true))
            .try_init()
    }
    .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;

    fn config_for(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            log_level: "info".into(),
            log_dir: dir.display().to_string(),
            log_file: "transfer.log".into(),
            use_json: true,
            rotation: "never".into(),
            enable_tracing: true,
            transfer: TransferConfig::default(),
        }
    }

    #[test]
    fn test_init_logging_writes_to_the_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging(&config_for(dir.path())).unwrap();

        tracing::info!(process_id = "smoke", "logging initialized");
        // Dropping the guard flushes the non-blocking writer
        drop(guard);

        let written = std::fs::read_to_string(dir.path().join("transfer.log")).unwrap();
        assert!(written.contains("logging initialized"));
        assert!(written.contains("smoke"));

        // The global subscriber slot is taken now; a second init must fail
        // instead of silently dropping the new configuration
        let again = tempfile::tempdir().unwrap();
        assert!(init_logging(&config_for(again.path())).is_err());
    }
}
