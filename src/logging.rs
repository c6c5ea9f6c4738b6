//! Logging Module
//!
//! Initializes structured application logging with env-filter level control
//! and optional daily-rolling file output.

use crate::config::LoggingConfig;
use crate::{ProxyError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. When `log_dir` is
/// set, output goes to a daily-rolling file and the returned guard must be
/// held for the lifetime of the process so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fallback-proxy.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init()
                .map_err(|e| {
                    ProxyError::ConfigError(format!("Failed to initialize logging: {}", e))
                })?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .try_init()
                .map_err(|e| {
                    ProxyError::ConfigError(format!("Failed to initialize logging: {}", e))
                })?;
            Ok(None)
        }
    }
}
