//! L2 Runtime - rollup state and chain storage
//!
//! This crate provides the enclave's L2 core:
//! - Signed transactions, rollups and their wire forms
//! - The balance ledger and the pure State Applier
//! - Key-value persistence (in-memory or sled) and the Chain Store
//! - The Speculative Executor loop

pub mod chain_store;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod processor;
pub mod rollup;
pub mod speculative;
pub mod transaction;

pub use chain_store::{BlockState, ChainStore};
pub use error::{StoreError, StoreResult};
pub use ledger::{ProcessedState, RollupState};
pub use persistence::{KvStore, MemoryKv, SledKv, WriteBatch};
pub use rollup::{ExtRollup, Rollup, RollupHeader, Withdrawal};
pub use speculative::{
    ExecutorConfig, ExecutorError, ExecutorHandle, SpeculativeExecutor, SpeculativeWork,
};
pub use transaction::{address_of, EncryptedTx, L2Tx, TxError, TxKind, CHAIN_ID};

/// Default number of ancestor rollups after which included transactions are
/// considered confirmed
pub const DEFAULT_PRUNE_DEPTH: u64 = 20;
