//! The reorg-detection state machine and its per-tick control flow.
//!
//! One [`Monitor`] owns all mutable state: the block cache, the height
//! watermarks, the chain-identity snapshot, and the hourly counters. State is
//! single-writer by construction: every mutation happens from the tick loop,
//! and the only concurrent RPC calls (the identity probe's chain-id and
//! genesis fetches) are joined before any state is touched.
//!
//! A tick runs seven ordered phases: identity probe, tip fetch, cold-start
//! check, rewind check, forward sync, deep recheck, prune. The whole tick sits
//! behind an error guard that swallows benign missing-block races and reports
//! everything else as an `RPC_ERROR` event.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::MonitorResult;
use crate::events::{EventEmitter, MonitorEvent, Severity};
use crate::monitor::cache::{BlockCache, BlockFingerprint, TxDiff};
use crate::monitor::stats::HourlyStats;
use crate::rpc::ChainRpc;

/// Detector tuning, decoupled from the env-driven [`crate::config::Config`]
/// so tests can construct monitors directly.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Number of recent heights re-verified each tick.
    pub recheck_depth: u64,
    /// Maximum heights retained in the block cache.
    pub cache_depth: u64,
    /// Spacing between chain-identity probes, in milliseconds.
    pub chain_metadata_poll_ms: u64,
    /// Spacing between hourly aggregate reports, in milliseconds.
    pub hourly_report_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            recheck_depth: 16,
            cache_depth: 2048,
            chain_metadata_poll_ms: 10_000,
            hourly_report_interval_ms: 3_600_000,
        }
    }
}

impl From<&crate::config::Config> for MonitorSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            recheck_depth: config.recheck_depth(),
            cache_depth: config.cache_depth(),
            chain_metadata_poll_ms: config.chain_metadata_poll_ms(),
            hourly_report_interval_ms: config.hourly_report_interval_ms(),
        }
    }
}

/// Process-wide monitor state, owned exclusively by the tick loop.
#[derive(Debug)]
pub struct MonitorState {
    /// Height-keyed fingerprint cache.
    pub block_cache: BlockCache,

    /// Highest height ever seen this run; monotone non-decreasing except on
    /// a detected rewind, which resets it to the new tip. `-1` before the
    /// first block.
    pub max_observed_height: i64,

    /// Tip of the last successful forward sync; `-1` before the first tick.
    pub last_processed_height: i64,

    /// Chain id recorded by the last identity probe.
    pub last_chain_id: Option<u64>,

    /// Genesis hash recorded by the last identity probe.
    pub last_genesis_hash: Option<alloy::primitives::B256>,

    /// Wall-clock of the last identity probe, epoch milliseconds.
    pub last_metadata_check_ms: u64,

    /// Counters for the current reporting window.
    pub hourly: HourlyStats,
}

impl MonitorState {
    fn new(now_ms: u64) -> Self {
        Self {
            block_cache: BlockCache::new(),
            max_observed_height: -1,
            last_processed_height: -1,
            last_chain_id: None,
            last_genesis_hash: None,
            last_metadata_check_ms: 0,
            hourly: HourlyStats::new(now_ms),
        }
    }
}

/// Chain-reorganization monitor.
///
/// Construction injects the RPC capability, the event emitter, and the
/// clock, so detection logic is fully drivable from tests with a scripted
/// chain and a manual clock.
pub struct Monitor {
    rpc: Arc<dyn ChainRpc>,
    emitter: EventEmitter,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    state: MonitorState,
}

impl Monitor {
    /// Create a monitor over the given capabilities.
    ///
    /// `recheck_depth` is clamped to `cache_depth`: rechecking beyond the
    /// cache window cannot detect replacements for the missing heights.
    #[must_use]
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        emitter: EventEmitter,
        clock: Arc<dyn Clock>,
        mut settings: MonitorSettings,
    ) -> Self {
        if settings.recheck_depth > settings.cache_depth {
            settings.recheck_depth = settings.cache_depth;
        }

        let now_ms = clock.now_ms();
        Self {
            rpc,
            emitter,
            clock,
            settings,
            state: MonitorState::new(now_ms),
        }
    }

    /// Read access to the monitor state, for tests and diagnostics.
    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Emit the startup event.
    pub fn announce_start(&self, chain: Option<String>, rpc: Option<String>) {
        self.emitter.emit(&MonitorEvent::MonitorStart {
            message: "Reorg monitor started".to_string(),
            chain,
            rpc,
        });
    }

    /// Run one tick of the polling loop.
    ///
    /// Never returns an error: benign missing-block races are swallowed
    /// silently, and anything else is reported as an `RPC_ERROR` event
    /// before the tick ends.
    pub async fn tick(&mut self) {
        if let Err(e) = self.run_tick().await {
            if e.is_block_not_found() {
                debug!(error = %e, "Ignoring missing-block race");
                return;
            }

            warn!(error = %e, "Tick aborted on RPC failure");
            self.emitter.emit(&MonitorEvent::RpcError {
                error: e.to_string(),
                message: None,
            });
        }
    }

    /// The seven ordered tick phases.
    async fn run_tick(&mut self) -> MonitorResult<()> {
        // Phase 1: identity probe (interval-gated)
        let now_ms = self.clock.now_ms();
        self.probe_chain_identity(now_ms).await?;

        // Phase 2: tip fetch
        let tip_block = self.rpc.get_block_latest().await?;
        let tip = tip_block.number;

        // Phase 3: cold start jumps to the tip instead of back-filling.
        // The skip is announced so analytics can tell it apart from a rewind.
        if self.state.last_processed_height == -1 && tip > 0 {
            info!(tip, "Cold start, skipping history");
            self.emitter.emit(&MonitorEvent::MonitorSkipHistory {
                message: format!("Cold start: monitoring begins at tip height {tip}"),
                skipped_to_height: tip,
            });
            self.state.last_processed_height = as_i64(tip) - 1;
        }

        // Phase 4: rewind check. The cache is not cleared; retained
        // fingerprints let later passes emit BLOCK_REPLACED for every
        // rewound height.
        if as_i64(tip) < self.state.max_observed_height {
            let from_height = u64::try_from(self.state.max_observed_height).unwrap_or(0);
            warn!(from_height, to_height = tip, "Chain tip rewound");

            self.state.hourly.chain_rewinds += 1;
            self.emitter.emit(&MonitorEvent::ChainRewind {
                from_height,
                to_height: tip,
                severity: Severity::Critical,
            });

            self.state.max_observed_height = as_i64(tip);
            self.state.last_processed_height = as_i64(tip);
        }

        // Phase 5: forward sync. Advances only on success; a stuck height
        // is retried next tick rather than skipped.
        let mut height = next_height(self.state.last_processed_height);
        while height <= tip {
            match self.process_block(height).await {
                Ok(()) => {
                    self.state.last_processed_height = as_i64(height);
                    height += 1;
                }
                Err(e) if e.is_block_not_found() => return Err(e),
                Err(e) => {
                    self.emitter.emit(&MonitorEvent::RpcError {
                        error: e.to_string(),
                        message: Some(format!("Failed to process block {height}")),
                    });
                    break;
                }
            }
        }

        // Phase 6: deep recheck. One transient failure must not block the
        // other recent heights, so errors are reported per height and the
        // sweep continues.
        if self.state.last_processed_height >= 0 {
            let upper = as_u64_clamped(self.state.last_processed_height);
            let floor = tip.saturating_sub(self.settings.recheck_depth.saturating_sub(1));

            for height in floor..=upper {
                match self.process_block(height).await {
                    Ok(()) => {}
                    Err(e) if e.is_block_not_found() => {
                        debug!(height, "Recheck skipped missing block");
                    }
                    Err(e) => {
                        self.emitter.emit(&MonitorEvent::RpcError {
                            error: e.to_string(),
                            message: Some(format!("Failed to recheck block {height}")),
                        });
                    }
                }
            }
        }

        // Phase 7: prune
        let floor = tip.saturating_sub(self.settings.cache_depth.saturating_sub(1));
        self.state.block_cache.prune(floor);

        Ok(())
    }

    /// Fetch and compare one height against the cached view.
    ///
    /// Detection rules fire in a fixed order: same-height divergence, then
    /// parent-hash discontinuity, then cache admission. A tip-level fork
    /// typically fires the first two together; the pair fully characterizes
    /// the fork with evidence from both sides.
    async fn process_block(&mut self, height: u64) -> MonitorResult<()> {
        let block = self.rpc.get_block_by_number(height).await?;
        let fresh = BlockFingerprint::from_block(&block);

        // Rule 1: same-height divergence
        let replaced = self.state.block_cache.get(height).and_then(|cached| {
            (cached.hash != fresh.hash).then(|| {
                (
                    cached.hash,
                    cached.state_root,
                    TxDiff::between(&cached.tx_hashes, &fresh.tx_hashes),
                )
            })
        });

        if let Some((old_hash, old_state_root, tx_diff)) = replaced {
            warn!(
                height,
                old_hash = %old_hash,
                new_hash = %fresh.hash,
                dropped = tx_diff.dropped.len(),
                added = tx_diff.added.len(),
                "Block replaced"
            );

            self.state.hourly.blocks_replaced += 1;
            self.emitter.emit(&MonitorEvent::BlockReplaced {
                height,
                old_hash,
                new_hash: fresh.hash,
                old_state_root,
                new_state_root: fresh.state_root,
                tx_diff,
                severity: Severity::Critical,
            });
        }

        // Rule 2: parent-hash discontinuity. Fires independently of rule 1.
        if height > 0 {
            let mismatch = self
                .state
                .block_cache
                .get(height - 1)
                .filter(|parent| parent.hash != fresh.parent_hash)
                .map(|parent| parent.hash);

            if let Some(expected_parent) = mismatch {
                warn!(
                    at_height = height,
                    expected_parent = %expected_parent,
                    actual_parent = %fresh.parent_hash,
                    "Parent hash mismatch"
                );

                self.state.hourly.reorgs_detected += 1;
                self.emitter.emit(&MonitorEvent::ParentHashMismatch {
                    at_height: height,
                    expected_parent,
                    actual_parent: fresh.parent_hash,
                    severity: Severity::Critical,
                });
            }
        }

        // Rule 3: new or changed entry. The identical-hash path is the
        // idempotent recheck: no event, no cache write.
        let changed = self
            .state
            .block_cache
            .get(height)
            .map_or(true, |cached| cached.hash != fresh.hash);

        if changed {
            self.emitter.emit(&MonitorEvent::BlockReceived {
                height,
                hash: block.hash,
                parent_hash: block.parent_hash,
                state_root: block.state_root,
                base_fee: block.base_fee_per_gas,
                gas_used: block.gas_used,
                tx_count: block.transactions.len(),
                transactions: block.transactions.clone(),
            });
            self.state.block_cache.put(height, fresh);
        }

        self.state.max_observed_height = self.state.max_observed_height.max(as_i64(height));
        self.state.hourly.blocks_processed += 1;

        Ok(())
    }

    /// Re-read chain id and genesis when the metadata interval has elapsed.
    ///
    /// `last_metadata_check_ms` is updated before the RPC calls go out so a
    /// slow probe cannot starve the next one back-to-back. The two fetches
    /// run concurrently and both results are joined before any state
    /// mutation. The first observation is recorded silently.
    async fn probe_chain_identity(&mut self, now_ms: u64) -> MonitorResult<()> {
        let elapsed = now_ms.saturating_sub(self.state.last_metadata_check_ms);
        if elapsed < self.settings.chain_metadata_poll_ms {
            return Ok(());
        }
        self.state.last_metadata_check_ms = now_ms;

        let (chain_id, genesis) =
            tokio::join!(self.rpc.get_chain_id(), self.rpc.get_block_by_number(0));
        let chain_id = chain_id?;
        let genesis = genesis?;

        if let Some(old_chain_id) = self.state.last_chain_id {
            if old_chain_id != chain_id {
                warn!(old_chain_id, new_chain_id = chain_id, "Chain id changed");
                self.emitter.emit(&MonitorEvent::ChainIdChanged {
                    old_chain_id,
                    new_chain_id: chain_id,
                    severity: Severity::Critical,
                });
            }
        }

        if let Some(old_genesis_hash) = self.state.last_genesis_hash {
            if old_genesis_hash != genesis.hash {
                warn!(
                    old_genesis = %old_genesis_hash,
                    new_genesis = %genesis.hash,
                    "Genesis hash changed"
                );
                self.emitter.emit(&MonitorEvent::GenesisChanged {
                    old_genesis_hash,
                    new_genesis_hash: genesis.hash,
                    severity: Severity::Critical,
                });
            }
        }

        self.state.last_chain_id = Some(chain_id);
        self.state.last_genesis_hash = Some(genesis.hash);

        Ok(())
    }

    /// Emit the aggregate report if the reporting interval has elapsed.
    ///
    /// Called between ticks so reports interleave with ticks only at tick
    /// boundaries. Resets the counters and restarts the window afterwards.
    pub fn maybe_emit_hourly_report(&mut self) {
        let now_ms = self.clock.now_ms();
        let elapsed = now_ms.saturating_sub(self.state.hourly.start_time_ms);
        if elapsed < self.settings.hourly_report_interval_ms {
            return;
        }

        let (threat_assessment, threat_details) = self.state.hourly.threat_assessment();
        info!(
            duration_minutes = elapsed / 60_000,
            threat = %threat_assessment,
            "Emitting aggregate report"
        );

        self.emitter.emit(&MonitorEvent::HourlyReport {
            duration_minutes: elapsed / 60_000,
            stats: self.state.hourly.snapshot(),
            threat_assessment,
            threat_details,
        });

        self.state.hourly.reset(now_ms);
    }
}

const fn as_i64(height: u64) -> i64 {
    // Heights beyond i64::MAX do not occur on real chains
    height as i64
}

fn as_u64_clamped(height: i64) -> u64 {
    u64::try_from(height).unwrap_or(0)
}

const fn next_height(last_processed: i64) -> u64 {
    if last_processed < 0 {
        0
    } else {
        (last_processed + 1) as u64
    }
}
