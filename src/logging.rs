//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! The crate only emits `tracing` events; hosts pick one initialiser:
//! - **Production** ([`init_production`]): JSON file layer (daily rotation) + console layer
//! - **Console** ([`init_cli`]): stderr only, for tools and local runs
//!
//! Events carry `tenant_id`, `channel` and a per-dispatch `dispatch_id`.
//! Access tokens are never recorded.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Holds the non-blocking writer guard for file logging.
///
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise production logging.
///
/// Writes JSON logs to `{logs_dir}/switchboard.log.YYYY-MM-DD` with daily
/// rotation and human-readable output to stderr, both filtered by
/// `RUST_LOG` (default: `info`).
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "switchboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise console-only logging on stderr, filtered by `RUST_LOG` (default: `info`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_cli() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Pick [`init_production`] when `logs_dir` is configured, else [`init_cli`].
///
/// # Errors
///
/// Propagates the chosen initialiser's error.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<LoggingGuard>> {
    match config.logs_dir.as_deref() {
        Some(dir) => init_production(dir).map(Some),
        None => init_cli().map(|()| None),
    }
}
