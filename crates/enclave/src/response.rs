//! Responses returned by the enclave façade

use crate::error::EnclaveError;
use l1_integration::Hash;
use l2_runtime::{BlockState, ExtRollup, Withdrawal};
use serde::{Deserialize, Serialize};

/// The L2 head after an ingested block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2HeadSummary {
    pub hash: Hash,
    pub height: u64,
    pub parent: Hash,
    pub withdrawals: Vec<Withdrawal>,
}

/// Outcome of ingesting one L1 block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSubmissionResponse {
    pub l1_hash: Hash,
    pub l1_height: u64,
    pub l1_parent: Hash,
    /// `None` while the block's fork has no L2 chain yet
    pub l2_head: Option<L2HeadSummary>,
    /// Rollup proposed by this node on top of the new head, for gossip
    pub produced_rollup: Option<ExtRollup>,
    /// Whether the block included a rollup that became the new head
    pub ingested_new_rollup: bool,
}

impl BlockSubmissionResponse {
    pub(crate) fn new(bs: &BlockState, produced_rollup: Option<ExtRollup>) -> Self {
        Self {
            l1_hash: bs.block.hash(),
            l1_height: bs.block.height,
            l1_parent: bs.block.parent_hash,
            l2_head: Some(L2HeadSummary {
                hash: bs.head.hash(),
                height: bs.head.height(),
                parent: bs.head.parent_hash(),
                withdrawals: bs.head.header.withdrawals.clone(),
            }),
            produced_rollup,
            ingested_new_rollup: bs.found_new_rollup,
        }
    }

    pub(crate) fn without_l2(block: &l1_integration::L1Block) -> Self {
        Self {
            l1_hash: block.hash(),
            l1_height: block.height,
            l1_parent: block.parent_hash,
            l2_head: None,
            produced_rollup: None,
            ingested_new_rollup: false,
        }
    }
}

/// Why a block was not ingested. These are normal outcomes, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The block was already processed
    AlreadySeen,
    /// The block's parent is unknown
    OrphanBlock,
    /// No shared secret yet
    NotInitialised,
}

/// Tagged outcome of `submit_block`
#[derive(Debug)]
pub enum BlockSubmission {
    Ingested(Box<BlockSubmissionResponse>),
    Rejected(Rejection),
    /// Processing failed; the block is left unseen
    Fault(EnclaveError),
}

impl BlockSubmission {
    pub fn is_ingested(&self) -> bool {
        matches!(self, Self::Ingested(_))
    }

    pub fn response(&self) -> Option<&BlockSubmissionResponse> {
        match self {
            Self::Ingested(response) => Some(response),
            _ => None,
        }
    }
}

/// Result of resolving one gossip round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// This node produced the winner; the rollup is to be published on L1
    Won(ExtRollup),
    /// Another node produced the winner
    Lost { winner: Hash },
    /// No valid candidate extends the parent
    NoCandidates,
}
