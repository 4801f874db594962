//! Enclave - confidential rollup node core
//!
//! This crate wires the chain store, the state applier, round resolution
//! and the speculative executor behind one façade:
//! - Shared-secret bootstrap gating participation
//! - L1 block ingestion and rollup production
//! - Gossip round resolution
//! - Transaction intake

pub mod config;
pub mod enclave;
pub mod error;
pub mod response;
pub mod secret;

#[cfg(test)]
mod tests;

pub use config::EnclaveConfig;
pub use enclave::Enclave;
pub use error::{EnclaveError, EnclaveResult};
pub use response::{
    BlockSubmission, BlockSubmissionResponse, L2HeadSummary, Rejection, RoundOutcome,
};
pub use secret::{AttestationReport, EncryptedSharedSecret, SharedSecret};
