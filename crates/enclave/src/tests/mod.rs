//! Enclave scenario tests

mod round_test;

use crate::{BlockSubmission, BlockSubmissionResponse, Enclave, EnclaveConfig};
use ed25519_dalek::SigningKey;
use l1_integration::{Address, Hash, L1Block, L1Event};
use l2_consensus::AtomicStats;
use l2_runtime::{address_of, ExtRollup, Rollup};
use std::sync::Arc;

pub(crate) fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub(crate) fn node(seed: u8) -> Address {
    Address([seed; 32])
}

/// Uninitialised in-memory enclave
pub(crate) fn bare_enclave(address: Address) -> (Enclave, Arc<AtomicStats>) {
    let stats = Arc::new(AtomicStats::new());
    let enclave = Enclave::new(EnclaveConfig::for_node(address), stats.clone()).unwrap();
    (enclave, stats)
}

/// Genesis-node enclave holding a freshly generated secret
pub(crate) fn enclave(address: Address) -> (Enclave, Arc<AtomicStats>) {
    let (enclave, stats) = bare_enclave(address);
    enclave.generate_secret().unwrap();
    (enclave, stats)
}

/// L1 genesis block funding `alice` with 100 and publishing the genesis rollup
pub(crate) fn genesis_block(alice: &SigningKey) -> L1Block {
    L1Block::new(
        Hash::ZERO,
        0,
        node(200),
        0,
        vec![
            L1Event::Deposit { to: address_of(alice), amount: 100 },
            L1Event::RollupPublished { rollup: Rollup::genesis().to_bytes() },
        ],
    )
}

/// Child of `parent`, optionally publishing a rollup
pub(crate) fn next_block(parent: &L1Block, published: Option<&ExtRollup>) -> L1Block {
    let events = published
        .map(|ext| vec![L1Event::RollupPublished { rollup: ext.to_bytes() }])
        .unwrap_or_default();
    L1Block::new(parent.hash(), parent.height + 1, node(200), 0, events)
}

pub(crate) fn ingested(submission: BlockSubmission) -> BlockSubmissionResponse {
    match submission {
        BlockSubmission::Ingested(response) => *response,
        other => panic!("expected an ingested block, got {:?}", other),
    }
}

pub(crate) fn produced(response: &BlockSubmissionResponse) -> Rollup {
    let ext = response.produced_rollup.as_ref().expect("a produced rollup");
    Rollup::from_ext(ext).unwrap()
}
