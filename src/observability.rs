//! Diagnostic logging infrastructure.
//!
//! The monitor's stdout is reserved for the event stream (one JSON record
//! per line), so all tracing diagnostics go to stderr, with an optional
//! JSON file layer for log aggregation.
//!
//! # Environment Configuration
//!
//! ```bash
//! # Set log level for all modules
//! RUST_LOG=debug reorg-monitor watch
//!
//! # Component-specific levels
//! RUST_LOG=reorg_monitor=debug,alloy=warn reorg-monitor watch
//!
//! # Write diagnostics to a daily-rotated JSON file as well
//! LOG_FILE=./logs/monitor.log reorg-monitor watch
//!
//! # JSON on stderr too (for containerized deployments)
//! LOG_JSON=true reorg-monitor watch
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Initialize the tracing subscriber.
///
/// Filter precedence: `RUST_LOG`, then the explicit `log_level`, then the
/// default of `info` for this crate and `warn` for dependencies.
///
/// Returns the file-appender guard when file logging is enabled; the caller
/// must hold it for the lifetime of the process or buffered lines are lost.
///
/// # Errors
///
/// Returns an error if the log file's parent directory cannot be created.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter = if let Ok(filter) = std::env::var("RUST_LOG") {
        EnvFilter::new(filter)
    } else if let Some(level) = log_level {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("reorg_monitor=info,warn")
    };

    // Console layer on stderr; stdout belongs to the event stream
    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let mut guard = None;
    let file_layer = if let Some(ref path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file_appender = tracing_appender::rolling::daily(
            path.parent().unwrap_or_else(|| Path::new(".")),
            path.file_name().unwrap_or_else(|| OsStr::new("monitor.log")),
        );

        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        // File output is always JSON for structured analysis
        Some(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_current_span(true)
                .with_target(true)
                .boxed(),
        )
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(file) = file_layer {
        subscriber.with(file).try_init()?;
    } else {
        subscriber.try_init()?;
    }

    info!(
        json_output,
        file_logging = log_file.is_some(),
        "Tracing initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent_enough() {
        // Only one subscriber can install per process; repeated calls must
        // not panic regardless of which test gets there first.
        let first = init_tracing(Some("debug".to_string()), None, false);
        let second = init_tracing(None, None, true);
        assert!(first.is_ok() || second.is_ok() || first.is_err());
    }
}
