//! Core types for rollup selection

use l1_integration::{Address, Hash};
use l2_runtime::{ChainStore, Rollup, StoreResult};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Rank of a candidate rollup. Greater is better: a more recent L1 proof
/// wins, then the lower nonce, then the lower hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupPriority {
    /// Height of the L1 block the rollup was produced against
    pub proof_height: u64,
    pub nonce: u64,
    pub hash: Hash,
}

impl RollupPriority {
    /// Rank a rollup. `None` when its proof block is unknown to this node,
    /// in which case the rollup cannot compete.
    pub fn of(rollup: &Rollup, store: &ChainStore) -> StoreResult<Option<Self>> {
        let proof = rollup.proof_hash();
        if proof.is_zero() {
            return Ok(None);
        }
        Ok(store.resolve_block(&proof)?.map(|block| Self {
            proof_height: block.height,
            nonce: rollup.header.nonce,
            hash: rollup.hash(),
        }))
    }
}

impl Ord for RollupPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.proof_height
            .cmp(&other.proof_height)
            .then_with(|| other.nonce.cmp(&self.nonce))
            .then_with(|| other.hash.cmp(&self.hash))
    }
}

impl PartialOrd for RollupPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Operator-facing counters fed by rollup selection and production
pub trait StatsCollector: Send + Sync {
    /// The speculative work of `producer` had to be thrown away and recomputed
    fn l2_recalc(&self, producer: &Address);

    /// A rollup built on a newer L1 proof displaced the current L1 winner
    fn rollup_with_more_recent_proof(&self);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsCollector for NoopStats {
    fn l2_recalc(&self, _producer: &Address) {}

    fn rollup_with_more_recent_proof(&self) {}
}

/// Lock-free counters
#[derive(Debug, Default)]
pub struct AtomicStats {
    l2_recalcs: AtomicU64,
    more_recent_proofs: AtomicU64,
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsensusStats {
        ConsensusStats {
            l2_recalcs: self.l2_recalcs.load(AtomicOrdering::Relaxed),
            rollups_with_more_recent_proof: self.more_recent_proofs.load(AtomicOrdering::Relaxed),
        }
    }
}

impl StatsCollector for AtomicStats {
    fn l2_recalc(&self, producer: &Address) {
        let total = self.l2_recalcs.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        tracing::debug!("Speculative work of {:?} recalculated ({} so far)", producer, total);
    }

    fn rollup_with_more_recent_proof(&self) {
        self.more_recent_proofs.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Point-in-time copy of [`AtomicStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsensusStats {
    pub l2_recalcs: u64,
    pub rollups_with_more_recent_proof: u64,
}
