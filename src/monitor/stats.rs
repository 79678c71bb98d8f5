//! Hourly counters and threat assessment.
//!
//! Counters are incremented by the detector at the exact points where the
//! corresponding events are emitted, so the hourly report is always
//! consistent with the event stream it summarizes.

use serde::Serialize;
use std::fmt;

/// Rolling counters for one reporting window.
///
/// `blocks_processed` counts every successful fetch-and-compare, including
/// idempotent deep-recheck hits, so at steady state its magnitude exceeds the
/// block-arrival rate by roughly `1 + RECHECK_DEPTH`. That makes it a direct
/// read on RPC load rather than chain throughput.
#[derive(Debug, Clone)]
pub struct HourlyStats {
    /// Wall-clock start of the current window, epoch milliseconds.
    pub start_time_ms: u64,

    /// Successful `process_block` calls (including no-op rechecks).
    pub blocks_processed: u64,

    /// Parent-hash discontinuities observed.
    pub reorgs_detected: u64,

    /// Same-height hash replacements observed.
    pub blocks_replaced: u64,

    /// Tip-height drops observed.
    pub chain_rewinds: u64,
}

impl HourlyStats {
    /// Start a fresh window at `now_ms`.
    #[must_use]
    pub const fn new(now_ms: u64) -> Self {
        Self {
            start_time_ms: now_ms,
            blocks_processed: 0,
            reorgs_detected: 0,
            blocks_replaced: 0,
            chain_rewinds: 0,
        }
    }

    /// Reset all counters and restart the window at `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        *self = Self::new(now_ms);
    }

    /// Snapshot the counters for serialization into an `HOURLY_REPORT`.
    #[must_use]
    pub const fn snapshot(&self) -> HourlyStatsSnapshot {
        HourlyStatsSnapshot {
            blocks_processed: self.blocks_processed,
            reorgs_detected: self.reorgs_detected,
            blocks_replaced: self.blocks_replaced,
            chain_rewinds: self.chain_rewinds,
        }
    }

    /// Derive the threat assessment for the current window.
    ///
    /// First match wins: any rewind is critical regardless of the other
    /// counters, sustained reorg activity is high, any reorg activity is
    /// medium, and a quiet window is low.
    #[must_use]
    pub fn threat_assessment(&self) -> (ThreatLevel, Vec<String>) {
        if self.chain_rewinds > 0 {
            return (
                ThreatLevel::Critical,
                vec![format!(
                    "{} chain rewind(s) observed this window",
                    self.chain_rewinds
                )],
            );
        }

        if self.reorgs_detected > 5 || self.blocks_replaced > 10 {
            let mut details = Vec::new();
            if self.reorgs_detected > 5 {
                details.push(format!(
                    "{} parent-hash mismatches exceed threshold of 5",
                    self.reorgs_detected
                ));
            }
            if self.blocks_replaced > 10 {
                details.push(format!(
                    "{} block replacements exceed threshold of 10",
                    self.blocks_replaced
                ));
            }
            return (ThreatLevel::High, details);
        }

        if self.reorgs_detected > 0 || self.blocks_replaced > 0 {
            let mut details = Vec::new();
            if self.reorgs_detected > 0 {
                details.push(format!(
                    "{} parent-hash mismatch(es) observed",
                    self.reorgs_detected
                ));
            }
            if self.blocks_replaced > 0 {
                details.push(format!(
                    "{} block replacement(s) observed",
                    self.blocks_replaced
                ));
            }
            return (ThreatLevel::Medium, details);
        }

        (ThreatLevel::Low, Vec::new())
    }
}

/// Serialized counter snapshot carried by `HOURLY_REPORT` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyStatsSnapshot {
    /// Successful `process_block` calls in the window.
    pub blocks_processed: u64,
    /// Parent-hash discontinuities in the window.
    pub reorgs_detected: u64,
    /// Same-height replacements in the window.
    pub blocks_replaced: u64,
    /// Tip rewinds in the window.
    pub chain_rewinds: u64,
}

/// Threat level derived from one window of counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    /// At least one chain rewind.
    Critical,
    /// Sustained reorg activity above thresholds.
    High,
    /// Some reorg activity.
    Medium,
    /// Quiet window.
    Low,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}
