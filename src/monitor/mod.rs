//! Chain-reorganization detection: cache, counters, and the state machine.
//!
//! This module is the monitor's core. It watches a chain through three
//! complementary lenses:
//!
//! 1. **Same-height divergence**: the canonical block at a cached height now
//!    has a different hash (`BLOCK_REPLACED`)
//! 2. **Parent linkage**: a block's parent hash disagrees with the cached
//!    block below it (`PARENT_HASH_MISMATCH`)
//! 3. **Tip rewind**: the reported tip height dropped below the observed
//!    maximum (`CHAIN_REWIND`)
//!
//! Detection works at any depth inside the cache window: each tick re-fetches
//! the most recent `RECHECK_DEPTH` heights, so a non-tip replacement is
//! caught as soon as it lands, not when the tip happens to link through it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use reorg_monitor::monitor::{Monitor, MonitorSettings};
//!
//! let mut monitor = Monitor::new(rpc, emitter, clock, MonitorSettings::default());
//! loop {
//!     monitor.tick().await;
//!     monitor.maybe_emit_hourly_report();
//!     // sleep until the next poll interval
//! }
//! ```

pub mod cache;
pub mod detector;
pub mod stats;

pub use cache::{BlockCache, BlockFingerprint, TxDiff};
pub use detector::{Monitor, MonitorSettings, MonitorState};
pub use stats::{HourlyStats, HourlyStatsSnapshot, ThreatLevel};
