//! Bounded cache of recent canonical block fingerprints.
//!
//! The cache is the monitor's memory: one [`BlockFingerprint`] per height,
//! bounded by the configured cache depth. Detection at any depth inside the
//! window works by comparing a freshly fetched block against the fingerprint
//! cached for the same height (replacement) and the one below it (parent
//! linkage).
//!
//! `put` is an unconditional overwrite and does not enforce the size bound;
//! the tick controller prunes once per tick, which keeps per-block cost O(1)
//! and makes eviction auditable in the logs. The cache is not required to be
//! contiguous in height: rechecks may repopulate older slots before younger
//! ones after a transient RPC failure.

use alloy::primitives::B256;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::rpc::BlockData;

/// The cached projection of a block at one height.
///
/// The minimal tuple that identifies a block for divergence detection:
/// hash, parent hash, state root, ordered transaction-hash sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFingerprint {
    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// State root, if the node reports one
    pub state_root: Option<B256>,

    /// Transaction hashes in block order
    pub tx_hashes: Vec<B256>,
}

impl BlockFingerprint {
    /// Create a fingerprint from a fetched block.
    #[must_use]
    pub fn from_block(block: &BlockData) -> Self {
        Self {
            hash: block.hash,
            parent_hash: block.parent_hash,
            state_root: block.state_root,
            tx_hashes: block.transactions.clone(),
        }
    }

    /// Create a fingerprint manually (useful for testing).
    #[must_use]
    pub fn new(
        hash: B256,
        parent_hash: B256,
        state_root: Option<B256>,
        tx_hashes: Vec<B256>,
    ) -> Self {
        Self {
            hash,
            parent_hash,
            state_root,
            tx_hashes,
        }
    }
}

/// The transaction-set difference between an old and a new fingerprint at
/// the same height.
///
/// Differences are on hash identity with multiset semantics: duplicates
/// within one side are preserved, and each side keeps its own block order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxDiff {
    /// Hashes present in the old block but not the new one, in old-block order
    pub dropped: Vec<B256>,

    /// Hashes present in the new block but not the old one, in new-block order
    pub added: Vec<B256>,
}

impl TxDiff {
    /// Compute the multiset difference between two ordered hash sequences.
    #[must_use]
    pub fn between(old: &[B256], new: &[B256]) -> Self {
        Self {
            dropped: multiset_subtract(old, new),
            added: multiset_subtract(new, old),
        }
    }

    /// Whether the two transaction sets were identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dropped.is_empty() && self.added.is_empty()
    }
}

/// `lhs \ rhs` as multisets, preserving `lhs` order.
fn multiset_subtract(lhs: &[B256], rhs: &[B256]) -> Vec<B256> {
    let mut remaining: HashMap<B256, usize> = HashMap::with_capacity(rhs.len());
    for hash in rhs {
        *remaining.entry(*hash).or_insert(0) += 1;
    }

    lhs.iter()
        .filter(|hash| {
            match remaining.get_mut(*hash) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    false
                }
                _ => true,
            }
        })
        .copied()
        .collect()
}

/// Ordered mapping from block height to one cached fingerprint.
#[derive(Debug, Default)]
pub struct BlockCache {
    entries: BTreeMap<u64, BlockFingerprint>,
}

impl BlockCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the fingerprint cached at a height.
    #[must_use]
    pub fn get(&self, height: u64) -> Option<&BlockFingerprint> {
        self.entries.get(&height)
    }

    /// Insert or replace the fingerprint at a height.
    pub fn put(&mut self, height: u64, fingerprint: BlockFingerprint) {
        self.entries.insert(height, fingerprint);
    }

    /// Delete every entry with height below `floor`.
    ///
    /// Returns the number of evicted entries.
    pub fn prune(&mut self, floor: u64) -> usize {
        let retained = self.entries.split_off(&floor);
        let evicted = self.entries.len();
        self.entries = retained;

        if evicted > 0 {
            debug!(floor, evicted, "Pruned block cache");
        }
        evicted
    }

    /// Number of cached heights.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached heights in ascending order.
    pub fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }
}
