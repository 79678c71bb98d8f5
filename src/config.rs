//! Configuration management for the reorg monitor.
//!
//! This module handles loading and validating configuration from environment
//! variables. The config is loaded in this order:
//! 1. Attempts to load `.env` file via `dotenvy`
//! 2. Applies the per-chain preset selected by `CHAIN`
//! 3. Reads environment variable overrides
//!
//! ## Environment Variables
//!
//! Optional (with defaults):
//! - `CHAIN`: Chain preset name (default: "ethereum"). Presets supply the
//!   RPC endpoint and a poll interval matched to the chain's block time.
//! - `RPC_URL`: Override the preset RPC endpoint
//! - `POLL_INTERVAL_MS`: Minimum spacing between tick starts
//! - `RECHECK_DEPTH`: Recent heights re-verified each tick (default: 16)
//! - `CACHE_DEPTH`: Maximum heights retained in cache (default: 2048)
//! - `CHAIN_METADATA_POLL_MS`: Spacing between chain-identity probes
//!   (default: 10000)
//! - `HOURLY_REPORT_INTERVAL_MS`: Spacing between aggregate reports
//!   (default: 3600000)
//! - `ALERT_WEBHOOK_URL`: Push-alert sink; empty disables alerting
//!
//! ## Example
//!
//! ```no_run
//! use reorg_monitor::config::Config;
//! use reorg_monitor::error::MonitorResult;
//!
//! # fn main() -> MonitorResult<()> {
//! let config = Config::from_env()?;
//! println!("Watching {} via {}", config.chain(), config.rpc_url());
//! # Ok(())
//! # }
//! ```

use crate::error::{MonitorError, MonitorResult};
use std::env;
use tracing::warn;

/// A per-chain preset: default RPC endpoint and poll interval.
///
/// Poll intervals track block time: a 12s-block chain gains nothing from
/// sub-second polling, while a 250ms-block rollup needs it to keep the
/// detection window tight.
#[derive(Debug, Clone, Copy)]
pub struct ChainPreset {
    /// Preset name as accepted by the `CHAIN` variable.
    pub name: &'static str,
    /// Default public RPC endpoint.
    pub rpc_url: &'static str,
    /// Default minimum spacing between tick starts, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Known chain presets.
pub const CHAIN_PRESETS: &[ChainPreset] = &[
    ChainPreset {
        name: "ethereum",
        rpc_url: "https://eth.llamarpc.com",
        poll_interval_ms: 5000,
    },
    ChainPreset {
        name: "polygon",
        rpc_url: "https://polygon-rpc.com",
        poll_interval_ms: 2000,
    },
    ChainPreset {
        name: "bsc",
        rpc_url: "https://bsc-dataseed.bnbchain.org",
        poll_interval_ms: 1500,
    },
    ChainPreset {
        name: "arbitrum",
        rpc_url: "https://arb1.arbitrum.io/rpc",
        poll_interval_ms: 250,
    },
    ChainPreset {
        name: "base",
        rpc_url: "https://mainnet.base.org",
        poll_interval_ms: 1000,
    },
];

/// Look up a chain preset by name (case-insensitive).
#[must_use]
pub fn chain_preset(name: &str) -> Option<&'static ChainPreset> {
    CHAIN_PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Main configuration struct for the monitor.
///
/// Contains all runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chain preset name
    chain: String,

    /// RPC endpoint URL
    rpc_url: String,

    /// Minimum spacing between tick starts, in milliseconds
    poll_interval_ms: u64,

    /// Number of recent heights re-verified each tick
    recheck_depth: u64,

    /// Maximum heights retained in the block cache
    cache_depth: u64,

    /// Spacing between chain-identity probes, in milliseconds
    chain_metadata_poll_ms: u64,

    /// Spacing between hourly aggregate reports, in milliseconds
    hourly_report_interval_ms: u64,

    /// Push-alert webhook URL; `None` disables alerting
    alert_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `CHAIN` names an unknown preset
    /// - The RPC URL is not an http(s) endpoint
    /// - A numeric variable fails to parse or is zero where zero is invalid
    pub fn from_env() -> MonitorResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        let chain = env::var("CHAIN").unwrap_or_else(|_| "ethereum".to_string());
        let preset = chain_preset(&chain).ok_or_else(|| {
            MonitorError::config(
                format!(
                    "Unknown CHAIN '{chain}'. Known presets: {}",
                    CHAIN_PRESETS
                        .iter()
                        .map(|p| p.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                None,
            )
        })?;

        let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| preset.rpc_url.to_string());
        if !rpc_url.starts_with("http") {
            return Err(MonitorError::config(
                format!(
                    "Invalid RPC_URL format: '{rpc_url}'. Expected an http(s) JSON-RPC endpoint"
                ),
                None,
            ));
        }

        let poll_interval_ms =
            parse_env_u64("POLL_INTERVAL_MS", preset.poll_interval_ms)?;
        if poll_interval_ms == 0 {
            return Err(MonitorError::config(
                "POLL_INTERVAL_MS must be greater than zero",
                None,
            ));
        }

        let cache_depth = parse_env_u64("CACHE_DEPTH", 2048)?;
        if cache_depth == 0 {
            return Err(MonitorError::config(
                "CACHE_DEPTH must be greater than zero",
                None,
            ));
        }

        let mut recheck_depth = parse_env_u64("RECHECK_DEPTH", 16)?;
        if recheck_depth > cache_depth {
            // Rechecking beyond the cache window cannot detect replacements
            // for the missing heights, so clamp rather than refuse.
            warn!(
                recheck_depth,
                cache_depth, "RECHECK_DEPTH exceeds CACHE_DEPTH, clamping"
            );
            recheck_depth = cache_depth;
        }

        let chain_metadata_poll_ms = parse_env_u64("CHAIN_METADATA_POLL_MS", 10_000)?;
        let hourly_report_interval_ms =
            parse_env_u64("HOURLY_REPORT_INTERVAL_MS", 3_600_000)?;

        let alert_webhook_url = match env::var("ALERT_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => Some(url),
            _ => None,
        };

        Ok(Self {
            chain,
            rpc_url,
            poll_interval_ms,
            recheck_depth,
            cache_depth,
            chain_metadata_poll_ms,
            hourly_report_interval_ms,
            alert_webhook_url,
        })
    }

    /// Get the chain preset name.
    #[must_use]
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Get the RPC endpoint URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the minimum spacing between tick starts, in milliseconds.
    #[must_use]
    pub const fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    /// Get the number of recent heights re-verified each tick.
    #[must_use]
    pub const fn recheck_depth(&self) -> u64 {
        self.recheck_depth
    }

    /// Get the maximum number of heights retained in the block cache.
    #[must_use]
    pub const fn cache_depth(&self) -> u64 {
        self.cache_depth
    }

    /// Get the spacing between chain-identity probes, in milliseconds.
    #[must_use]
    pub const fn chain_metadata_poll_ms(&self) -> u64 {
        self.chain_metadata_poll_ms
    }

    /// Get the spacing between hourly aggregate reports, in milliseconds.
    #[must_use]
    pub const fn hourly_report_interval_ms(&self) -> u64 {
        self.hourly_report_interval_ms
    }

    /// Get the alert webhook URL, if alerting is enabled.
    #[must_use]
    pub fn alert_webhook_url(&self) -> Option<&str> {
        self.alert_webhook_url.as_deref()
    }
}

/// Parse an optional numeric environment variable with a default.
fn parse_env_u64(name: &str, default: u64) -> MonitorResult<u64> {
    match env::var(name) {
        Ok(raw) => raw.parse::<u64>().map_err(|e| {
            MonitorError::config(
                format!("{name} must be a valid non-negative number, got '{raw}'"),
                Some(Box::new(e)),
            )
        }),
        Err(_) => Ok(default),
    }
}
