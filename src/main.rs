//! CLI entry point for the chain-reorganization monitor.
//!
//! # Architecture Flow
//!
//! This binary delegates to the CLI module, which orchestrates all layers:
//!
//! ```text
//! main.rs (Runtime Initialization)
//!     ↓
//! CLI Layer (src/cli.rs)
//!     ↓
//! 1. Config Layer (src/config.rs)      → Chain preset + env overrides
//! 2. RPC Layer (src/rpc.rs)            → ChainRpc capability over alloy
//! 3. Monitor (src/monitor/)            → Tick loop, detection rules, counters
//! 4. Events Layer (src/events.rs)      → One JSON record per observation
//! 5. Alerts (src/alert.rs)             → Fire-and-forget webhook posts
//! ```
//!
//! Channel separation: stdout carries the event stream, stderr carries
//! tracing diagnostics. All errors bubble up with context via
//! `MonitorResult<T>`.

use std::path::PathBuf;

use reorg_monitor::{cli, observability};

/// Entry point for the reorg monitor.
///
/// Initializes:
/// - Tokio async runtime (via `#[tokio::main]`)
/// - Structured logging on stderr (stdout is the event stream)
/// - Optional JSON file logging via `LOG_FILE` / `LOG_JSON`
///
/// Then delegates to the CLI module for all business logic.
#[tokio::main]
async fn main() {
    let log_file = std::env::var("LOG_FILE").ok().map(PathBuf::from);
    let log_json = std::env::var("LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    // The guard must outlive the run so buffered file logs are flushed.
    let _log_guard = match observability::init_tracing(None, log_file, log_json) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
