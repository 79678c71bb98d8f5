//! Integration tests for the reorg-detection state machine.
//!
//! Every scenario starts with a cold monitor, a deterministic manual clock,
//! a scripted mock chain, and a capturing event sink, then drives the tick
//! loop by hand and asserts on the ordered event stream.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy::primitives::B256;
use async_trait::async_trait;

use reorg_monitor::clock::ManualClock;
use reorg_monitor::error::{MonitorError, MonitorResult};
use reorg_monitor::events::{EventEmitter, EventSink};
use reorg_monitor::monitor::{Monitor, MonitorSettings};
use reorg_monitor::rpc::{BlockData, ChainRpc};

/// Deterministic hash from a seed.
fn h(seed: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    B256::from(bytes)
}

/// Canonical hash for the block at `height` on the scripted chain.
fn block_hash(height: u64) -> B256 {
    h(0x1000_0000 + height)
}

/// Canonical single transaction for the block at `height`.
fn tx_hash(height: u64) -> B256 {
    h(0x2000_0000 + height)
}

fn linear_block(height: u64) -> BlockData {
    BlockData {
        number: height,
        hash: block_hash(height),
        parent_hash: if height == 0 {
            B256::ZERO
        } else {
            block_hash(height - 1)
        },
        state_root: Some(h(0x3000_0000 + height)),
        base_fee_per_gas: Some(1_000_000_000),
        gas_used: 15_000_000,
        transactions: vec![tx_hash(height)],
    }
}

/// Scripted chain: a height-keyed block table plus queued errors for the
/// tip fetch, mutated from tests between ticks.
#[derive(Default)]
struct MockChain {
    inner: Mutex<MockChainInner>,
}

#[derive(Default)]
struct MockChainInner {
    chain_id: u64,
    latest: u64,
    blocks: BTreeMap<u64, BlockData>,
    latest_errors: VecDeque<MonitorError>,
}

impl MockChain {
    fn linear(latest: u64) -> Arc<Self> {
        let chain = Self::default();
        {
            let mut inner = chain.inner.lock().unwrap();
            inner.chain_id = 1;
            inner.latest = latest;
            for height in 0..=latest {
                inner.blocks.insert(height, linear_block(height));
            }
        }
        Arc::new(chain)
    }

    fn set_latest(&self, latest: u64) {
        self.inner.lock().unwrap().latest = latest;
    }

    fn set_chain_id(&self, chain_id: u64) {
        self.inner.lock().unwrap().chain_id = chain_id;
    }

    fn set_block(&self, block: BlockData) {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .insert(block.number, block);
    }

    fn push_latest_error(&self, error: MonitorError) {
        self.inner.lock().unwrap().latest_errors.push_back(error);
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_block_latest(&self) -> MonitorResult<BlockData> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.latest_errors.pop_front() {
            return Err(error);
        }
        inner
            .blocks
            .get(&inner.latest)
            .cloned()
            .ok_or_else(|| MonitorError::block_not_found(inner.latest))
    }

    async fn get_block_by_number(&self, height: u64) -> MonitorResult<BlockData> {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| MonitorError::block_not_found(height))
    }

    async fn get_chain_id(&self) -> MonitorResult<u64> {
        Ok(self.inner.lock().unwrap().chain_id)
    }
}

/// Sink that captures parsed event records in emission order.
#[derive(Default)]
struct CaptureSink {
    records: Mutex<Vec<serde_json::Value>>,
}

impl EventSink for CaptureSink {
    fn write_record(&self, line: &str) {
        let value: serde_json::Value =
            serde_json::from_str(line).expect("every record is one JSON object");
        self.records.lock().unwrap().push(value);
    }
}

impl CaptureSink {
    fn events(&self) -> Vec<serde_json::Value> {
        self.records.lock().unwrap().clone()
    }

    fn drain(&self) -> Vec<serde_json::Value> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }

    fn types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap().to_string())
            .collect()
    }

    fn count_of(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| *t == event_type).count()
    }

    fn first_of(&self, event_type: &str) -> Option<serde_json::Value> {
        self.events()
            .into_iter()
            .find(|e| e["event_type"] == event_type)
    }
}

/// Build a cold monitor over the scripted chain.
fn harness(
    chain: Arc<MockChain>,
    settings: MonitorSettings,
) -> (Monitor, Arc<CaptureSink>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let sink = Arc::new(CaptureSink::default());
    let emitter = EventEmitter::new(clock.clone(), sink.clone(), None);
    let monitor = Monitor::new(chain, emitter, clock.clone(), settings);
    (monitor, sink, clock)
}

fn hex(hash: B256) -> String {
    format!("{hash}")
}

// --- Scenario S1: rewind ---------------------------------------------------

#[tokio::test]
async fn s1_rewind_after_linear_sync() {
    let chain = MockChain::linear(5);
    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());

    monitor.tick().await;

    // Tick 1: forward sync reaches the tip and the deep recheck back-fills
    // the window, so all six heights are received.
    assert_eq!(sink.count_of("BLOCK_RECEIVED"), 6);
    assert_eq!(sink.count_of("MONITOR_SKIP_HISTORY"), 1);
    sink.drain();

    chain.set_latest(3);
    monitor.tick().await;

    let events = sink.events();
    assert_eq!(events.len(), 1, "rewind tick emits only CHAIN_REWIND");
    assert_eq!(events[0]["event_type"], "CHAIN_REWIND");
    assert_eq!(events[0]["from_height"], 5);
    assert_eq!(events[0]["to_height"], 3);
    assert_eq!(events[0]["severity"], "CRITICAL");
}

// --- Scenario S2: same-height replacement with tx diff ---------------------

#[tokio::test]
async fn s2_block_replaced_reports_tx_diff() {
    let chain = MockChain::linear(2);
    let tx_a = h(0xa);
    let tx_b = h(0xb);
    let tx_c = h(0xc);

    chain.set_block(BlockData {
        transactions: vec![tx_a, tx_b],
        ..linear_block(2)
    });

    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());
    monitor.tick().await;
    sink.drain();

    // Height 2 is replaced: new hash, one tx dropped, one added.
    let new_hash = h(0xdead_0002);
    chain.set_block(BlockData {
        hash: new_hash,
        transactions: vec![tx_b, tx_c],
        state_root: Some(h(0xfeed_0002)),
        ..linear_block(2)
    });

    monitor.tick().await;

    let replaced = sink.first_of("BLOCK_REPLACED").expect("replacement event");
    assert_eq!(replaced["height"], 2);
    assert_eq!(replaced["old_hash"], hex(block_hash(2)));
    assert_eq!(replaced["new_hash"], hex(new_hash));
    assert_eq!(replaced["severity"], "CRITICAL");
    assert_eq!(
        replaced["tx_diff"]["dropped"],
        serde_json::json!([hex(tx_a)])
    );
    assert_eq!(replaced["tx_diff"]["added"], serde_json::json!([hex(tx_c)]));
    assert_eq!(replaced["old_state_root"], hex(h(0x3000_0000 + 2)));
    assert_eq!(replaced["new_state_root"], hex(h(0xfeed_0002)));
}

// --- Scenario S3: replacement plus parent discontinuity --------------------

#[tokio::test]
async fn s3_parent_mismatch_fires_alongside_replacement() {
    let chain = MockChain::linear(2);
    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());
    monitor.tick().await;
    sink.drain();

    let other_parent = h(0x07e4);
    chain.set_block(BlockData {
        hash: h(0xdead_0003),
        parent_hash: other_parent,
        ..linear_block(2)
    });

    monitor.tick().await;

    let mismatch = sink
        .first_of("PARENT_HASH_MISMATCH")
        .expect("mismatch event");
    assert_eq!(mismatch["at_height"], 2);
    assert_eq!(mismatch["expected_parent"], hex(block_hash(1)));
    assert_eq!(mismatch["actual_parent"], hex(other_parent));
    assert_eq!(mismatch["severity"], "CRITICAL");

    let replaced = sink.first_of("BLOCK_REPLACED").expect("replacement event");
    assert_eq!(replaced["height"], 2);

    // Rules fire in order: replacement evidence first, then linkage break.
    let types = sink.types();
    let replaced_at = types.iter().position(|t| t == "BLOCK_REPLACED").unwrap();
    let mismatch_at = types
        .iter()
        .position(|t| t == "PARENT_HASH_MISMATCH")
        .unwrap();
    assert!(replaced_at < mismatch_at);
}

// --- Scenario S4: non-tip replacement caught by the deep recheck -----------

#[tokio::test]
async fn s4_deep_recheck_catches_non_tip_replacement() {
    let chain = MockChain::linear(10);
    let settings = MonitorSettings {
        recheck_depth: 5,
        ..MonitorSettings::default()
    };
    let (mut monitor, sink, _clock) = harness(chain.clone(), settings);
    monitor.tick().await;
    sink.drain();

    // Replace height 8, inside the recheck window but below the tip.
    chain.set_block(BlockData {
        hash: h(0xdead_0008),
        ..linear_block(8)
    });

    monitor.tick().await;

    let replaced = sink.first_of("BLOCK_REPLACED").expect("replacement event");
    assert_eq!(replaced["height"], 8);
    assert_eq!(replaced["old_hash"], hex(block_hash(8)));
}

#[tokio::test]
async fn s4_replacement_below_recheck_window_is_missed() {
    // The flip side of the recheck cost model: a divergence older than the
    // window is not observed until something links through it.
    let chain = MockChain::linear(10);
    let settings = MonitorSettings {
        recheck_depth: 2,
        ..MonitorSettings::default()
    };
    let (mut monitor, sink, _clock) = harness(chain.clone(), settings);
    monitor.tick().await;
    sink.drain();

    chain.set_block(BlockData {
        hash: h(0xdead_0001),
        ..linear_block(1)
    });

    monitor.tick().await;
    assert_eq!(sink.count_of("BLOCK_REPLACED"), 0);
}

// --- Scenario S5: prune leaves exactly the window --------------------------

#[tokio::test]
async fn s5_cache_pruned_to_depth_after_tick() {
    let chain = MockChain::linear(10);
    let settings = MonitorSettings {
        cache_depth: 3,
        ..MonitorSettings::default()
    };
    let (mut monitor, _sink, _clock) = harness(chain, settings);

    monitor.tick().await;

    let heights: Vec<u64> = monitor.state().block_cache.heights().collect();
    assert_eq!(heights, vec![8, 9, 10]);
}

// --- Scenario S6: chain identity changes -----------------------------------

#[tokio::test]
async fn s6_identity_changes_emit_both_events() {
    let chain = MockChain::linear(2);
    let (mut monitor, sink, clock) = harness(chain.clone(), MonitorSettings::default());

    monitor.tick().await;
    // First observation is recorded silently.
    assert_eq!(sink.count_of("CHAIN_ID_CHANGED"), 0);
    assert_eq!(sink.count_of("GENESIS_CHANGED"), 0);
    sink.drain();

    // The node now reports a different identity.
    let new_genesis = h(0xb);
    chain.set_chain_id(2);
    chain.set_block(BlockData {
        hash: new_genesis,
        ..linear_block(0)
    });

    clock.advance(10_000);
    monitor.tick().await;

    let id_changed = sink.first_of("CHAIN_ID_CHANGED").expect("chain id event");
    assert_eq!(id_changed["old_chain_id"], 1);
    assert_eq!(id_changed["new_chain_id"], 2);
    assert_eq!(id_changed["severity"], "CRITICAL");

    let genesis_changed = sink.first_of("GENESIS_CHANGED").expect("genesis event");
    assert_eq!(genesis_changed["old_genesis_hash"], hex(block_hash(0)));
    assert_eq!(genesis_changed["new_genesis_hash"], hex(new_genesis));
    assert_eq!(genesis_changed["severity"], "CRITICAL");

    // Identity events precede any block events in the tick.
    let types = sink.types();
    let id_at = types.iter().position(|t| t == "CHAIN_ID_CHANGED").unwrap();
    let first_block = types.iter().position(|t| t == "BLOCK_REPLACED");
    if let Some(block_at) = first_block {
        assert!(id_at < block_at);
    }
}

// --- Scenario S7: missing-block race vs real failure -----------------------

#[tokio::test]
async fn s7_block_not_found_is_silent_but_boom_is_not() {
    let chain = MockChain::linear(3);
    chain.push_latest_error(MonitorError::block_not_found(4));
    chain.push_latest_error(MonitorError::rpc("boom", None));

    let (mut monitor, sink, _clock) = harness(chain, MonitorSettings::default());

    monitor.tick().await;
    assert_eq!(sink.count_of("RPC_ERROR"), 0, "missing block is swallowed");
    assert!(sink.events().is_empty());

    monitor.tick().await;
    assert_eq!(sink.count_of("RPC_ERROR"), 1);
    let error = sink.first_of("RPC_ERROR").unwrap();
    assert!(error["error"].as_str().unwrap().contains("boom"));
}

// --- Invariants ------------------------------------------------------------

#[tokio::test]
async fn invariant_cache_bound_holds_across_ticks() {
    let chain = MockChain::linear(4);
    let settings = MonitorSettings {
        cache_depth: 8,
        recheck_depth: 8,
        ..MonitorSettings::default()
    };
    let (mut monitor, _sink, _clock) = harness(chain.clone(), settings);

    let mut latest: u64 = 4;
    for _ in 0..12 {
        monitor.tick().await;

        let cache = &monitor.state().block_cache;
        assert!(cache.len() <= 8);
        for height in cache.heights() {
            assert!(height >= latest.saturating_sub(7));
        }

        // The chain grows a few blocks between ticks.
        for _ in 0..3 {
            latest += 1;
            chain.set_block(linear_block(latest));
        }
        chain.set_latest(latest);
    }
}

#[tokio::test]
async fn invariant_watermark_monotone_except_rewind() {
    let chain = MockChain::linear(5);
    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());

    monitor.tick().await;
    assert_eq!(monitor.state().max_observed_height, 5);

    chain.set_block(linear_block(6));
    chain.set_block(linear_block(7));
    chain.set_latest(7);
    monitor.tick().await;
    assert_eq!(monitor.state().max_observed_height, 7);

    chain.set_latest(4);
    monitor.tick().await;
    assert_eq!(sink.count_of("CHAIN_REWIND"), 1);
    assert_eq!(monitor.state().max_observed_height, 4);
    assert_eq!(monitor.state().last_processed_height, 4);
}

#[tokio::test]
async fn invariant_block_received_once_while_cached() {
    let chain = MockChain::linear(3);
    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());

    let mut latest = 3;
    for _ in 0..6 {
        monitor.tick().await;
        latest += 1;
        chain.set_block(linear_block(latest));
        chain.set_latest(latest);
    }

    // No replacements and no evictions happened, so every (height, hash)
    // pair appears exactly once.
    let mut seen = std::collections::HashSet::new();
    for event in sink.events() {
        if event["event_type"] == "BLOCK_RECEIVED" {
            let key = (
                event["height"].as_u64().unwrap(),
                event["hash"].as_str().unwrap().to_string(),
            );
            assert!(seen.insert(key), "duplicate BLOCK_RECEIVED for {event}");
        }
    }
}

#[tokio::test]
async fn invariant_replacement_updates_cache_entry() {
    let chain = MockChain::linear(4);
    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());
    monitor.tick().await;
    sink.drain();

    let new_hash = h(0xdead_0004);
    chain.set_block(BlockData {
        hash: new_hash,
        ..linear_block(4)
    });
    monitor.tick().await;

    let replaced = sink.first_of("BLOCK_REPLACED").unwrap();
    assert_eq!(replaced["old_hash"], hex(block_hash(4)));
    assert_eq!(monitor.state().block_cache.get(4).unwrap().hash, new_hash);
}

#[tokio::test]
async fn invariant_rpc_error_never_carries_block_not_found() {
    let chain = MockChain::linear(3);
    // A burst of races across several ticks
    for _ in 0..3 {
        chain.push_latest_error(MonitorError::block_not_found(99));
    }
    chain.push_latest_error(MonitorError::rpc("connection reset", None));

    let (mut monitor, sink, _clock) = harness(chain, MonitorSettings::default());
    for _ in 0..5 {
        monitor.tick().await;
    }

    for event in sink.events() {
        if event["event_type"] == "RPC_ERROR" {
            assert!(!event["error"].as_str().unwrap().contains("Block not found"));
        }
    }
    assert_eq!(sink.count_of("RPC_ERROR"), 1);
}

// --- Hourly aggregation ----------------------------------------------------

#[tokio::test]
async fn hourly_report_reflects_window_and_escalates() {
    let chain = MockChain::linear(3);
    let settings = MonitorSettings {
        hourly_report_interval_ms: 3_600_000,
        ..MonitorSettings::default()
    };
    let (mut monitor, sink, clock) = harness(chain.clone(), settings);

    monitor.tick().await;

    // One replacement during the window
    chain.set_block(BlockData {
        hash: h(0xdead_0003),
        ..linear_block(3)
    });
    monitor.tick().await;
    sink.drain();

    clock.advance(3_600_000);
    monitor.maybe_emit_hourly_report();

    let report = sink.first_of("HOURLY_REPORT").expect("report due");
    assert_eq!(report["duration_minutes"], 60);
    assert_eq!(report["stats"]["blocks_replaced"], 1);
    assert_eq!(report["stats"]["chain_rewinds"], 0);
    assert_eq!(report["threat_assessment"], "MEDIUM");
    assert!(!report["threat_details"].as_array().unwrap().is_empty());

    // The window resets: a quiet hour reports LOW with zeroed counters.
    sink.drain();
    clock.advance(3_600_000);
    monitor.maybe_emit_hourly_report();

    let quiet = sink.first_of("HOURLY_REPORT").unwrap();
    assert_eq!(quiet["stats"]["blocks_replaced"], 0);
    assert_eq!(quiet["threat_assessment"], "LOW");
}

#[tokio::test]
async fn hourly_report_rates_rewind_critical() {
    let chain = MockChain::linear(6);
    let (mut monitor, sink, clock) = harness(chain.clone(), MonitorSettings::default());

    monitor.tick().await;
    chain.set_latest(2);
    monitor.tick().await;
    sink.drain();

    clock.advance(3_600_000);
    monitor.maybe_emit_hourly_report();

    let report = sink.first_of("HOURLY_REPORT").unwrap();
    assert_eq!(report["stats"]["chain_rewinds"], 1);
    assert_eq!(report["threat_assessment"], "CRITICAL");
}

// --- Forward-sync failure policy -------------------------------------------

#[tokio::test]
async fn forward_sync_stops_at_failed_height_and_retries() {
    let chain = MockChain::linear(3);
    let (mut monitor, sink, _clock) = harness(chain.clone(), MonitorSettings::default());
    monitor.tick().await;
    sink.drain();

    // The chain advances to 6, but height 5 is temporarily missing: the
    // sync must stop at 4 without introducing a gap.
    chain.set_block(linear_block(4));
    chain.set_block(linear_block(6));
    chain.set_latest(6);
    monitor.tick().await;

    assert_eq!(monitor.state().last_processed_height, 4);
    assert_eq!(sink.count_of("RPC_ERROR"), 0, "missing block stays silent");

    // Height 5 appears; the next tick completes the range.
    chain.set_block(linear_block(5));
    monitor.tick().await;

    assert_eq!(monitor.state().last_processed_height, 6);
    assert!(monitor.state().block_cache.get(5).is_some());
    assert!(monitor.state().block_cache.get(6).is_some());
}
