//! Structured event records and the emitter that writes them.
//!
//! Every observation the monitor makes is one event: a JSON object written to
//! stdout as a single line, carrying an ISO-8601 UTC `timestamp`, an
//! `event_type` tag, and a type-specific payload. Emission is synchronous
//! from the caller's perspective: the record reaches the sink before control
//! returns.
//!
//! Events that warrant operator attention (every `CRITICAL`-severity event,
//! plus hourly reports whose assessment is above `LOW`) are additionally
//! handed to the alert dispatcher. Alert delivery is fire-and-forget; it can
//! neither stall emission nor drop a record from the primary log.

use alloy::primitives::B256;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tracing::error;

use crate::alert::AlertDispatcher;
use crate::clock::Clock;
use crate::monitor::cache::TxDiff;
use crate::monitor::stats::{HourlyStatsSnapshot, ThreatLevel};

/// Severity attached to events that indicate chain-integrity violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// The observed chain contradicts the cached view.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One observation made by the monitor.
///
/// Serialized with the `event_type` tag and the payload fields inlined, so a
/// record is a single flat JSON object.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type")]
pub enum MonitorEvent {
    /// The monitor came up and connected to an endpoint.
    #[serde(rename = "MONITOR_START")]
    MonitorStart {
        /// Human-readable startup message
        message: String,
        /// Chain preset name, when configured
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<String>,
        /// RPC host (key material redacted)
        #[serde(skip_serializing_if = "Option::is_none")]
        rpc: Option<String>,
    },

    /// Cold start: the monitor jumped to the current tip instead of
    /// back-filling history.
    #[serde(rename = "MONITOR_SKIP_HISTORY")]
    MonitorSkipHistory {
        /// Human-readable explanation
        message: String,
        /// The tip height the monitor skipped to
        skipped_to_height: u64,
    },

    /// A block was seen for the first time at its height, or replaced a
    /// previously cached one.
    #[serde(rename = "BLOCK_RECEIVED")]
    BlockReceived {
        /// Block height
        height: u64,
        /// Block hash
        hash: B256,
        /// Parent block hash
        parent_hash: B256,
        /// State root, if reported
        state_root: Option<B256>,
        /// Base fee per gas, absent on pre-EIP-1559 chains
        #[serde(skip_serializing_if = "Option::is_none")]
        base_fee: Option<u64>,
        /// Gas used by the block
        gas_used: u64,
        /// Number of transactions
        tx_count: usize,
        /// Transaction hashes in block order
        transactions: Vec<B256>,
    },

    /// The canonical block at a cached height changed hash.
    #[serde(rename = "BLOCK_REPLACED")]
    BlockReplaced {
        /// Affected height
        height: u64,
        /// Previously cached hash
        old_hash: B256,
        /// Newly observed hash
        new_hash: B256,
        /// Previously cached state root
        old_state_root: Option<B256>,
        /// Newly observed state root
        new_state_root: Option<B256>,
        /// Transactions dropped from / added to the height
        tx_diff: TxDiff,
        /// Always critical
        severity: Severity,
    },

    /// A block's parent hash does not match the cached block below it.
    #[serde(rename = "PARENT_HASH_MISMATCH")]
    ParentHashMismatch {
        /// Height of the block whose parent link broke
        at_height: u64,
        /// Hash cached at `at_height - 1`
        expected_parent: B256,
        /// Parent hash the new block actually carries
        actual_parent: B256,
        /// Always critical
        severity: Severity,
    },

    /// The reported tip height dropped below the observed maximum.
    #[serde(rename = "CHAIN_REWIND")]
    ChainRewind {
        /// Highest height previously observed
        from_height: u64,
        /// Newly reported tip height
        to_height: u64,
        /// Always critical
        severity: Severity,
    },

    /// The node's chain id changed between identity probes.
    #[serde(rename = "CHAIN_ID_CHANGED")]
    ChainIdChanged {
        /// Previously observed chain id
        old_chain_id: u64,
        /// Newly observed chain id
        new_chain_id: u64,
        /// Always critical
        severity: Severity,
    },

    /// The genesis block hash changed between identity probes.
    #[serde(rename = "GENESIS_CHANGED")]
    GenesisChanged {
        /// Previously observed genesis hash
        old_genesis_hash: B256,
        /// Newly observed genesis hash
        new_genesis_hash: B256,
        /// Always critical
        severity: Severity,
    },

    /// Periodic counter summary with a derived threat assessment.
    #[serde(rename = "HOURLY_REPORT")]
    HourlyReport {
        /// Window length in whole minutes
        duration_minutes: u64,
        /// Counter snapshot for the window
        stats: HourlyStatsSnapshot,
        /// Derived assessment (first-match ladder)
        threat_assessment: ThreatLevel,
        /// Human-readable trigger descriptions
        threat_details: Vec<String>,
    },

    /// A non-benign RPC failure.
    #[serde(rename = "RPC_ERROR")]
    RpcError {
        /// The underlying error text
        error: String,
        /// Context for where the error surfaced
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl MonitorEvent {
    /// The `event_type` tag this event serializes with.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MonitorStart { .. } => "MONITOR_START",
            Self::MonitorSkipHistory { .. } => "MONITOR_SKIP_HISTORY",
            Self::BlockReceived { .. } => "BLOCK_RECEIVED",
            Self::BlockReplaced { .. } => "BLOCK_REPLACED",
            Self::ParentHashMismatch { .. } => "PARENT_HASH_MISMATCH",
            Self::ChainRewind { .. } => "CHAIN_REWIND",
            Self::ChainIdChanged { .. } => "CHAIN_ID_CHANGED",
            Self::GenesisChanged { .. } => "GENESIS_CHANGED",
            Self::HourlyReport { .. } => "HOURLY_REPORT",
            Self::RpcError { .. } => "RPC_ERROR",
        }
    }

    /// The severity attached to this event, if any.
    #[must_use]
    pub const fn severity(&self) -> Option<Severity> {
        match self {
            Self::BlockReplaced { severity, .. }
            | Self::ParentHashMismatch { severity, .. }
            | Self::ChainRewind { severity, .. }
            | Self::ChainIdChanged { severity, .. }
            | Self::GenesisChanged { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    /// Whether this event should also be pushed to the alert sink.
    ///
    /// Every critical event qualifies; an hourly report qualifies when its
    /// assessment rose above `LOW`.
    #[must_use]
    pub fn alert_worthy(&self) -> bool {
        match self {
            Self::HourlyReport {
                threat_assessment, ..
            } => *threat_assessment != ThreatLevel::Low,
            _ => self.severity().is_some(),
        }
    }
}

/// The envelope actually written to the sink: timestamp + flattened event.
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a MonitorEvent,
}

/// Format epoch milliseconds as ISO-8601 UTC.
fn iso8601_utc(epoch_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(i64::try_from(epoch_ms).unwrap_or(0))
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Destination for serialized event records.
///
/// One call per record; implementations must write the line atomically with
/// respect to other records.
pub trait EventSink: Send + Sync {
    /// Write one serialized record.
    fn write_record(&self, line: &str);
}

/// Production sink: one line per record on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn write_record(&self, line: &str) {
        // Lock for the duration of the record so a record is one write and
        // interleaving with other output cannot split it.
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{line}");
        let _ = handle.flush();
    }
}

/// Serializes events into records and routes alert-worthy ones to the
/// dispatcher.
pub struct EventEmitter {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    alerts: Option<AlertDispatcher>,
}

impl EventEmitter {
    /// Create an emitter over the given clock, sink, and optional alert
    /// dispatcher.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        alerts: Option<AlertDispatcher>,
    ) -> Self {
        Self {
            clock,
            sink,
            alerts,
        }
    }

    /// Emit one event: serialize, write to the sink, and forward to the
    /// alert dispatcher when warranted.
    ///
    /// The sink write completes before this returns; alert delivery is
    /// spawned and never awaited here.
    pub fn emit(&self, event: &MonitorEvent) {
        let record = EventRecord {
            timestamp: iso8601_utc(self.clock.now_ms()),
            event,
        };

        match serde_json::to_string(&record) {
            Ok(line) => self.sink.write_record(&line),
            Err(e) => error!(error = %e, event_type = event.event_type(), "Failed to serialize event"),
        }

        if event.alert_worthy() {
            if let Some(alerts) = &self.alerts {
                alerts.dispatch(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;

    /// Sink that captures records for assertions.
    #[derive(Debug, Default)]
    pub struct VecSink {
        pub records: Mutex<Vec<String>>,
    }

    impl EventSink for VecSink {
        fn write_record(&self, line: &str) {
            self.records.lock().unwrap().push(line.to_string());
        }
    }

    fn h(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn test_iso8601_formatting() {
        assert_eq!(iso8601_utc(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso8601_utc(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_record_shape_is_flat() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let sink = Arc::new(VecSink::default());
        let emitter = EventEmitter::new(clock, sink.clone(), None);

        emitter.emit(&MonitorEvent::ChainRewind {
            from_height: 10,
            to_height: 7,
            severity: Severity::Critical,
        });

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);

        let value: serde_json::Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(value["event_type"], "CHAIN_REWIND");
        assert_eq!(value["from_height"], 10);
        assert_eq!(value["to_height"], 7);
        assert_eq!(value["severity"], "CRITICAL");
        assert_eq!(value["timestamp"], "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_block_received_field_names() {
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(VecSink::default());
        let emitter = EventEmitter::new(clock, sink.clone(), None);

        emitter.emit(&MonitorEvent::BlockReceived {
            height: 3,
            hash: h(1),
            parent_hash: h(2),
            state_root: Some(h(3)),
            base_fee: None,
            gas_used: 21_000,
            tx_count: 1,
            transactions: vec![h(9)],
        });

        let records = sink.records.lock().unwrap();
        let value: serde_json::Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(value["event_type"], "BLOCK_RECEIVED");
        assert_eq!(value["height"], 3);
        assert_eq!(value["tx_count"], 1);
        assert!(value["transactions"].is_array());
        // base_fee is omitted entirely when absent
        assert!(value.get("base_fee").is_none());
    }

    #[test]
    fn test_alert_worthiness() {
        let critical = MonitorEvent::ParentHashMismatch {
            at_height: 5,
            expected_parent: h(1),
            actual_parent: h(2),
            severity: Severity::Critical,
        };
        assert!(critical.alert_worthy());

        let routine = MonitorEvent::RpcError {
            error: "boom".to_string(),
            message: None,
        };
        assert!(!routine.alert_worthy());

        let quiet_report = MonitorEvent::HourlyReport {
            duration_minutes: 60,
            stats: HourlyStatsSnapshot {
                blocks_processed: 100,
                reorgs_detected: 0,
                blocks_replaced: 0,
                chain_rewinds: 0,
            },
            threat_assessment: ThreatLevel::Low,
            threat_details: vec![],
        };
        assert!(!quiet_report.alert_worthy());

        let noisy_report = MonitorEvent::HourlyReport {
            duration_minutes: 60,
            stats: HourlyStatsSnapshot {
                blocks_processed: 100,
                reorgs_detected: 2,
                blocks_replaced: 0,
                chain_rewinds: 0,
            },
            threat_assessment: ThreatLevel::Medium,
            threat_details: vec!["2 parent-hash mismatch(es) observed".to_string()],
        };
        assert!(noisy_report.alert_worthy());
    }

    #[test]
    fn test_event_type_matches_serialization() {
        let event = MonitorEvent::MonitorSkipHistory {
            message: "skipping".to_string(),
            skipped_to_height: 99,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], event.event_type());
    }
}
