//! Command-line interface for the reorg monitor.
//!
//! # Commands
//!
//! - `watch`: Run the polling loop until interrupted
//! - `tick`: Run exactly one tick and exit (smoke test for an endpoint)
//!
//! # Example
//!
//! ```bash
//! # Monitor Ethereum mainnet with the preset endpoint
//! reorg-monitor watch
//!
//! # Monitor a custom endpoint at a tighter interval
//! RPC_URL="https://..." reorg-monitor watch --interval-ms 500
//!
//! # Verify an endpoint is usable
//! CHAIN=base reorg-monitor tick
//! ```

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::alert::AlertDispatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::MonitorResult;
use crate::events::{EventEmitter, StdoutSink};
use crate::monitor::{Monitor, MonitorSettings};
use crate::rpc::{redact_rpc_url, HttpChainRpc};

/// Chain-reorganization monitor
#[derive(Parser, Debug)]
#[command(name = "reorg-monitor")]
#[command(about = "Watches a chain over JSON-RPC and emits structured events on reorganization", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the polling loop until interrupted
    Watch {
        /// Minimum spacing between tick starts, in milliseconds
        /// (overrides POLL_INTERVAL_MS and the chain preset)
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Run exactly one tick and exit
    Tick,
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration loading or provider construction
/// fails. Once the loop is running, RPC failures surface as `RPC_ERROR`
/// events rather than process exits.
pub async fn run() -> MonitorResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { interval_ms } => run_watch_command(interval_ms).await,
        Commands::Tick => run_tick_command().await,
    }
}

/// Wire the monitor from config: RPC capability, emitter, clock, settings.
fn build_monitor(config: &Config) -> MonitorResult<Monitor> {
    let rpc = Arc::new(HttpChainRpc::connect(config.rpc_url())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let alerts = AlertDispatcher::from_url(config.alert_webhook_url());
    let emitter = EventEmitter::new(clock.clone(), Arc::new(StdoutSink), alerts);

    Ok(Monitor::new(
        rpc,
        emitter,
        clock,
        MonitorSettings::from(config),
    ))
}

/// Execute the watch command (continuous monitoring).
async fn run_watch_command(interval_override: Option<u64>) -> MonitorResult<()> {
    let config = Config::from_env()?;
    let poll_interval =
        Duration::from_millis(interval_override.unwrap_or_else(|| config.poll_interval_ms()));

    info!(
        chain = config.chain(),
        rpc_host = %redact_rpc_url(config.rpc_url()),
        poll_interval_ms = poll_interval.as_millis() as u64,
        recheck_depth = config.recheck_depth(),
        cache_depth = config.cache_depth(),
        "Starting watch loop"
    );

    let mut monitor = build_monitor(&config)?;
    monitor.announce_start(
        Some(config.chain().to_string()),
        Some(redact_rpc_url(config.rpc_url())),
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let tick_started = Instant::now();

        // An in-flight tick always runs to completion; the shutdown signal
        // is only consulted between ticks.
        monitor.tick().await;
        monitor.maybe_emit_hourly_report();

        // The interval bounds spacing between tick *starts*: a slow tick is
        // followed immediately by the next one.
        let idle = poll_interval.saturating_sub(tick_started.elapsed());
        debug!(idle_ms = idle.as_millis() as u64, "Tick complete");

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping watch loop");
                break;
            }
            () = tokio::time::sleep(idle) => {}
        }
    }

    Ok(())
}

/// Execute the tick command (one pass, then exit).
async fn run_tick_command() -> MonitorResult<()> {
    let config = Config::from_env()?;
    let mut monitor = build_monitor(&config)?;

    monitor.announce_start(
        Some(config.chain().to_string()),
        Some(redact_rpc_url(config.rpc_url())),
    );
    monitor.tick().await;

    info!(
        last_processed = monitor.state().last_processed_height,
        cached_heights = monitor.state().block_cache.len(),
        "Single tick complete"
    );

    Ok(())
}
