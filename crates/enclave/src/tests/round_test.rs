//! RoundWinner / SubmitRollup scenarios

use super::*;
use crate::{EnclaveError, RoundOutcome};
use l2_runtime::{EncryptedTx, L2Tx};

/// Enclave that caught up on b0 (genesis) and b1 without producing anything
fn setup(local: Address) -> (Enclave, L1Block, L1Block) {
    let (enclave, _) = enclave(local);
    let b0 = genesis_block(&key(1));
    let b1 = next_block(&b0, None);
    enclave.ingest_blocks(&[b0.clone(), b1.clone()]).unwrap();
    (enclave, b0, b1)
}

fn candidate(proof: &L1Block, agg: Address, nonce: u64) -> Rollup {
    child_of(&Rollup::genesis(), proof, agg, nonce)
}

fn child_of(parent: &Rollup, proof: &L1Block, agg: Address, nonce: u64) -> Rollup {
    Rollup::new(proof.hash(), parent, agg, vec![], vec![], nonce, vec![])
}

#[test]
fn test_round_winner_is_deterministic() {
    let (enclave, b0, b1) = setup(node(1));

    // two rollups at height 1; the round is resolved on top of `parent`
    let parent = candidate(&b0, node(5), 0);
    let sibling = candidate(&b0, node(6), 1);
    for r in [&parent, &sibling] {
        assert!(enclave.submit_rollup(r.to_ext()).unwrap());
    }

    let same_proof = child_of(&parent, &b0, node(1), 0);
    let high_nonce = child_of(&parent, &b1, node(2), 9);
    let best = child_of(&parent, &b1, node(3), 2);
    // same height, better rank, but built on the sibling
    let foreign = child_of(&sibling, &b1, node(4), 0);
    for r in [&same_proof, &high_nonce, &best, &foreign] {
        assert!(enclave.submit_rollup(r.to_ext()).unwrap());
    }

    let first = enclave.round_winner(&parent.hash()).unwrap();
    let second = enclave.round_winner(&parent.hash()).unwrap();

    assert_eq!(first, RoundOutcome::Lost { winner: best.hash() });
    assert_eq!(first, second);
    assert_eq!(enclave.store().head().unwrap().unwrap(), best);
    assert!(enclave.store().fetch_rollup_state(&best.hash()).unwrap().is_some());
}

#[test]
fn test_height_skipping_rollup_cannot_take_the_head() {
    let (enclave, _, b1) = setup(node(1));
    let best = candidate(&b1, node(3), 2);
    assert!(enclave.submit_rollup(best.to_ext()).unwrap());

    let mut skipped = candidate(&b1, node(4), 0);
    skipped.header.height = 50;
    assert!(!enclave.submit_rollup(skipped.to_ext()).unwrap());
    assert!(!enclave.store().exist_rollup(&skipped.hash()).unwrap());

    assert_eq!(
        enclave.round_winner(&Rollup::genesis().hash()).unwrap(),
        RoundOutcome::Lost { winner: best.hash() }
    );
    assert_eq!(enclave.store().head().unwrap().unwrap(), best);
}

#[test]
fn test_local_producer_wins() {
    let (enclave, _, b1) = setup(node(1));
    let ours = candidate(&b1, node(1), 1);
    let theirs = candidate(&b1, node(2), 5);
    enclave.submit_rollup(theirs.to_ext()).unwrap();
    enclave.submit_rollup(ours.to_ext()).unwrap();

    assert_eq!(
        enclave.round_winner(&Rollup::genesis().hash()).unwrap(),
        RoundOutcome::Won(ours.to_ext())
    );
}

#[test]
fn test_round_without_candidates() {
    let (enclave, _, _) = setup(node(1));
    assert_eq!(
        enclave.round_winner(&Rollup::genesis().hash()).unwrap(),
        RoundOutcome::NoCandidates
    );
}

#[test]
fn test_round_on_unknown_parent_fails() {
    let (enclave, _, _) = setup(node(1));
    assert!(matches!(
        enclave.round_winner(&Hash([9u8; 32])),
        Err(EnclaveError::Store(_))
    ));
}

#[test]
fn test_orphan_rollup_dropped() {
    let (enclave, _, b1) = setup(node(1));
    let unknown = candidate(&b1, node(2), 1);
    let orphan = Rollup::new(b1.hash(), &unknown, node(2), vec![], vec![], 3, vec![]);

    assert!(!enclave.submit_rollup(orphan.to_ext()).unwrap());
    assert!(!enclave.store().exist_rollup(&orphan.hash()).unwrap());
}

#[test]
fn test_tampered_rollup_rejected() {
    let (enclave, _, b1) = setup(node(1));
    let rollup = candidate(&b1, node(2), 1);
    let mut ext = rollup.to_ext();
    ext.txs.push(EncryptedTx::seal(&L2Tx::withdrawal(&key(1), 0, 1)));

    assert!(matches!(
        enclave.submit_rollup(ext),
        Err(EnclaveError::InvalidTransaction(_))
    ));
    assert!(!enclave.store().exist_rollup(&rollup.hash()).unwrap());
}
