//! Round resolution - picks one rollup among competing candidates
//!
//! Every node ranks candidates with the same total order
//! ([`RollupPriority`]), so every node picks the same winner from the same
//! candidate set regardless of arrival order.

use crate::types::{RollupPriority, StatsCollector};
use l2_runtime::processor::apply_rollup;
use l2_runtime::{ChainStore, Rollup, RollupState, StoreResult};

/// Best candidate extending `parent`. Candidates on another parent, at the
/// wrong height, with an unknown proof block, or proven by an older L1
/// block than `parent` are ignored. `on_newer_proof` fires whenever a
/// candidate displaces the current best thanks to a more recent proof.
fn best_candidate<'a>(
    parent: &Rollup,
    candidates: &'a [Rollup],
    store: &ChainStore,
    mut on_newer_proof: impl FnMut(),
) -> StoreResult<Option<&'a Rollup>> {
    let parent_hash = parent.hash();
    let parent_proof_height = RollupPriority::of(parent, store)?
        .map(|p| p.proof_height)
        .unwrap_or(0);

    let mut best: Option<(RollupPriority, &Rollup)> = None;
    for candidate in candidates {
        if candidate.parent_hash() != parent_hash || candidate.height() != parent.height() + 1 {
            continue;
        }

        let priority = match RollupPriority::of(candidate, store)? {
            Some(priority) => priority,
            None => {
                tracing::warn!(
                    "Ignoring rollup r_{}: proof block {:?} is unknown",
                    candidate.hash().short(),
                    candidate.proof_hash()
                );
                continue;
            }
        };
        if priority.proof_height < parent_proof_height {
            tracing::debug!(
                "Ignoring rollup r_{}: proof older than its parent's",
                candidate.hash().short()
            );
            continue;
        }

        let replace = match best.map(|(current, _)| current) {
            None => true,
            Some(current) if priority > current => {
                if priority.proof_height > current.proof_height {
                    on_newer_proof();
                }
                true
            }
            Some(_) => false,
        };
        if replace {
            best = Some((priority, candidate));
        }
    }

    Ok(best.map(|(_, rollup)| rollup))
}

/// Winner of a gossip round on top of `parent`, with its derived state
pub fn find_round_winner(
    candidates: &[Rollup],
    parent: &Rollup,
    parent_state: &RollupState,
    store: &ChainStore,
) -> StoreResult<Option<(Rollup, RollupState)>> {
    let winner = match best_candidate(parent, candidates, store, || {})? {
        Some(winner) => winner.clone(),
        None => return Ok(None),
    };

    let state = apply_rollup(parent, parent_state, &winner, store)?;
    if state.state_blob() != winner.header.state {
        tracing::warn!(
            "Round winner r_{} declares a state that differs from the recomputed one",
            winner.hash().short()
        );
    }

    tracing::info!(
        "Round winner at height {}: r_{} (agg {:?}, nonce {})",
        winner.height(),
        winner.hash().short(),
        winner.header.agg,
        winner.header.nonce
    );
    Ok(Some((winner, state)))
}

/// The rollup, among those published in one L1 block, that becomes the new
/// L2 head on top of `parent`
pub fn find_winner(
    parent: &Rollup,
    published: &[Rollup],
    store: &ChainStore,
    stats: &dyn StatsCollector,
) -> StoreResult<Option<Rollup>> {
    Ok(best_candidate(parent, published, store, || stats.rollup_with_more_recent_proof())?.cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomicStats;
    use ed25519_dalek::SigningKey;
    use l1_integration::{Address, Hash, L1Block, L1Event};
    use l2_runtime::address_of;
    use l2_runtime::processor::rollup_state;

    struct Fixture {
        store: ChainStore,
        blocks: Vec<L1Block>,
        parent: Rollup,
    }

    /// L1 chain b0..b3 (b0 funds alice), genesis rollup and a parent at height 1 proven by b0
    fn fixture(alice: &SigningKey) -> Fixture {
        let store = ChainStore::in_memory();
        let mut blocks: Vec<L1Block> = Vec::new();
        for height in 0..4u64 {
            let parent = blocks.last().map(L1Block::hash).unwrap_or(Hash::ZERO);
            let events = if height == 0 {
                vec![L1Event::Deposit { to: address_of(alice), amount: 100 }]
            } else {
                vec![]
            };
            let block = L1Block::new(parent, height, Address::ZERO, 0, events);
            store.store_block(&block).unwrap();
            blocks.push(block);
        }

        let genesis = Rollup::genesis();
        store.store_rollup(&genesis).unwrap();
        let parent =
            Rollup::new(blocks[0].hash(), &genesis, Address::ZERO, vec![], vec![], 0, vec![]);
        store.store_rollup(&parent).unwrap();

        Fixture { store, blocks, parent }
    }

    fn candidate(f: &Fixture, proof: usize, nonce: u64) -> Rollup {
        Rollup::new(
            f.blocks[proof].hash(),
            &f.parent,
            Address([nonce as u8; 32]),
            vec![],
            vec![],
            nonce,
            vec![],
        )
    }

    #[test]
    fn test_round_winner_is_order_independent() {
        let alice = SigningKey::from_bytes(&[1u8; 32]);
        let f = fixture(&alice);
        let parent_state = rollup_state(&f.parent, &f.store).unwrap();

        let a = candidate(&f, 1, 7);
        let b = candidate(&f, 1, 3);
        let c = candidate(&f, 2, 9);

        let candidates = [a.clone(), b.clone(), c.clone()];
        let forward = find_round_winner(&candidates, &f.parent, &parent_state, &f.store)
            .unwrap()
            .unwrap();
        let backward = find_round_winner(&[c.clone(), b, a], &f.parent, &parent_state, &f.store)
            .unwrap()
            .unwrap();

        assert_eq!(forward.0, c);
        assert_eq!(backward.0, c);
        assert_eq!(forward.1.balance(&address_of(&alice)), 100);
    }

    #[test]
    fn test_foreign_parent_never_wins() {
        let alice = SigningKey::from_bytes(&[1u8; 32]);
        let f = fixture(&alice);
        let parent_state = rollup_state(&f.parent, &f.store).unwrap();

        let foreign = Rollup::new(
            f.blocks[3].hash(),
            &Rollup::genesis(),
            Address::ZERO,
            vec![],
            vec![],
            0,
            vec![],
        );
        assert!(find_round_winner(&[foreign.clone()], &f.parent, &parent_state, &f.store)
            .unwrap()
            .is_none());

        let honest = candidate(&f, 1, 50);
        let candidates = [foreign, honest.clone()];
        let (winner, _) = find_round_winner(&candidates, &f.parent, &parent_state, &f.store)
            .unwrap()
            .unwrap();
        assert_eq!(winner, honest);
    }

    #[test]
    fn test_unknown_proof_is_ignored() {
        let alice = SigningKey::from_bytes(&[1u8; 32]);
        let f = fixture(&alice);
        let unknown =
            Rollup::new(Hash([42u8; 32]), &f.parent, Address::ZERO, vec![], vec![], 0, vec![]);
        assert!(find_winner(&f.parent, &[unknown], &f.store, &AtomicStats::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_more_recent_proof_counted() {
        let alice = SigningKey::from_bytes(&[1u8; 32]);
        let f = fixture(&alice);
        let stats = AtomicStats::new();

        let old = candidate(&f, 1, 1);
        let newer = candidate(&f, 3, 5);
        let winner = find_winner(&f.parent, &[old, newer.clone()], &f.store, &stats)
            .unwrap()
            .unwrap();

        assert_eq!(winner, newer);
        assert_eq!(stats.snapshot().rollups_with_more_recent_proof, 1);
    }

    #[test]
    fn test_stale_height_ignored() {
        let alice = SigningKey::from_bytes(&[1u8; 32]);
        let f = fixture(&alice);
        let stats = AtomicStats::new();
        assert!(find_winner(&f.parent, &[f.parent.clone()], &f.store, &stats)
            .unwrap()
            .is_none());
    }
}
