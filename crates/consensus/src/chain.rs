//! Per-block chain derivation
//!
//! Folding an L1 block picks the rollup it includes (if any) as the new L2
//! head and records the resulting [`BlockState`].

use crate::round::find_winner;
use crate::types::StatsCollector;
use l1_integration::L1Block;
use l2_runtime::processor::apply_rollup;
use l2_runtime::{BlockState, ChainStore, Rollup, RollupState, StoreResult};

/// Decode the rollups published in a block and store those that can be
/// linked to the chain. Undecodable payloads and orphans are logged and
/// skipped.
pub fn extract_rollups(block: &L1Block, store: &ChainStore) -> StoreResult<Vec<Rollup>> {
    let mut rollups = Vec::new();
    for payload in block.published_rollups() {
        let rollup = match Rollup::from_bytes(payload) {
            Ok(rollup) => rollup,
            Err(e) => {
                tracing::warn!("Undecodable rollup in b_{}: {}", block.hash().short(), e);
                continue;
            }
        };

        if !store.extends_stored_parent(&rollup)? {
            tracing::warn!(
                "Rollup r_{} in b_{} does not extend a known parent",
                rollup.hash().short(),
                block.hash().short()
            );
            continue;
        }

        store.store_rollup(&rollup)?;
        rollups.push(rollup);
    }
    Ok(rollups)
}

/// State after `block`. Ancestors without a computed state are folded
/// first. `None` means there is no L2 chain on this block's fork yet.
pub fn update_state(
    block: &L1Block,
    store: &ChainStore,
    stats: &dyn StatsCollector,
) -> StoreResult<Option<BlockState>> {
    if let Some(bs) = store.fetch_state(&block.hash())? {
        return Ok(Some(bs));
    }

    // Walk back to the closest block whose state is known
    let mut unfolded = vec![block.clone()];
    let mut base = None;
    loop {
        let oldest = &unfolded[unfolded.len() - 1];
        if oldest.is_genesis() {
            break;
        }
        let parent = match store.parent_block(oldest)? {
            Some(parent) => parent,
            None => break,
        };
        if let Some(bs) = store.fetch_state(&parent.hash())? {
            base = Some(bs);
            break;
        }
        unfolded.push(parent);
    }

    for next in unfolded.into_iter().rev() {
        base = fold_block(&next, base.as_ref(), store, stats)?;
    }
    Ok(base)
}

fn fold_block(
    block: &L1Block,
    parent: Option<&BlockState>,
    store: &ChainStore,
    stats: &dyn StatsCollector,
) -> StoreResult<Option<BlockState>> {
    let published = extract_rollups(block, store)?;

    let parent = match parent {
        Some(parent) => parent,
        None => return genesis_state(block, &published, store),
    };

    let bs = match find_winner(&parent.head, &published, store, stats)? {
        Some(winner) => {
            let state = apply_rollup(&parent.head, &parent.state, &winner, store)?;
            tracing::info!(
                "b_{} includes new head r_{} at height {}",
                block.hash().short(),
                winner.hash().short(),
                winner.height()
            );
            BlockState {
                block: block.clone(),
                head: winner,
                state,
                found_new_rollup: true,
            }
        }
        None => BlockState {
            block: block.clone(),
            head: parent.head.clone(),
            state: parent.state.clone(),
            found_new_rollup: false,
        },
    };

    store.set_block_state(&bs)?;
    Ok(Some(bs))
}

/// A block without parent state only has L2 state if it publishes the genesis rollup
fn genesis_state(
    block: &L1Block,
    published: &[Rollup],
    store: &ChainStore,
) -> StoreResult<Option<BlockState>> {
    let genesis = match published.iter().find(|r| r.is_genesis()) {
        Some(genesis) => genesis.clone(),
        None => return Ok(None),
    };

    tracing::info!(
        "Found genesis rollup r_{} in b_{}",
        genesis.hash().short(),
        block.hash().short()
    );
    let bs = BlockState {
        block: block.clone(),
        head: genesis,
        state: RollupState::default(),
        found_new_rollup: true,
    };
    store.set_block_state(&bs)?;
    Ok(Some(bs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AtomicStats, NoopStats};
    use ed25519_dalek::SigningKey;
    use l1_integration::{Address, Hash, L1Event};
    use l2_runtime::{address_of, L2Tx};

    fn block(parent: Option<&L1Block>, nonce: u64, events: Vec<L1Event>) -> L1Block {
        L1Block::new(
            parent.map(L1Block::hash).unwrap_or(Hash::ZERO),
            parent.map(|p| p.height + 1).unwrap_or(0),
            Address::ZERO,
            nonce,
            events,
        )
    }

    fn publish(rollup: &Rollup) -> L1Event {
        L1Event::RollupPublished { rollup: rollup.to_bytes() }
    }

    #[test]
    fn test_no_state_before_genesis() {
        let store = ChainStore::in_memory();
        let b0 = block(None, 0, vec![]);
        store.store_block(&b0).unwrap();
        assert!(update_state(&b0, &store, &NoopStats).unwrap().is_none());
        assert!(store.fetch_state(&b0.hash()).unwrap().is_none());
    }

    #[test]
    fn test_genesis_then_included_rollup() {
        let store = ChainStore::in_memory();
        let alice = SigningKey::from_bytes(&[1u8; 32]);
        let bob = address_of(&SigningKey::from_bytes(&[2u8; 32]));

        let genesis = Rollup::genesis();
        let b0 = block(None, 0, vec![L1Event::Deposit { to: address_of(&alice), amount: 10 }]);
        let b1 = block(Some(&b0), 0, vec![publish(&genesis)]);
        for b in [&b0, &b1] {
            store.store_block(b).unwrap();
        }

        let bs1 = update_state(&b1, &store, &NoopStats).unwrap().unwrap();
        assert_eq!(bs1.head, genesis);
        assert!(bs1.found_new_rollup);
        assert_eq!(store.genesis_rollup().unwrap(), Some(genesis.clone()));

        let r1 = Rollup::new(
            b1.hash(),
            &genesis,
            address_of(&alice),
            vec![L2Tx::transfer(&alice, 0, bob, 4)],
            vec![],
            3,
            vec![],
        );
        let b2 = block(Some(&b1), 0, vec![publish(&r1)]);
        store.store_block(&b2).unwrap();

        let bs2 = update_state(&b2, &store, &NoopStats).unwrap().unwrap();
        assert_eq!(bs2.head, r1);
        // the transfer ran before the deposit was credited, so it was skipped
        assert_eq!(bs2.state.balance(&address_of(&alice)), 10);
        assert_eq!(bs2.state.balance(&bob), 0);

        let b3 = block(Some(&b2), 0, vec![]);
        store.store_block(&b3).unwrap();
        let bs3 = update_state(&b3, &store, &NoopStats).unwrap().unwrap();
        assert_eq!(bs3.head, r1);
        assert!(!bs3.found_new_rollup);
        assert_eq!(store.head_block_state().unwrap().unwrap().block, b3);
    }

    #[test]
    fn test_missing_ancestor_states_are_folded() {
        let store = ChainStore::in_memory();
        let genesis = Rollup::genesis();
        let b0 = block(None, 0, vec![publish(&genesis)]);
        let b1 = block(Some(&b0), 0, vec![]);
        let b2 = block(Some(&b1), 0, vec![]);
        for b in [&b0, &b1, &b2] {
            store.store_block(b).unwrap();
        }

        let bs2 = update_state(&b2, &store, &NoopStats).unwrap().unwrap();
        assert_eq!(bs2.head, genesis);
        assert!(store.fetch_state(&b1.hash()).unwrap().is_some());
        assert!(store.fetch_state(&b0.hash()).unwrap().is_some());
    }

    #[test]
    fn test_best_published_rollup_wins() {
        let store = ChainStore::in_memory();
        let stats = AtomicStats::new();
        let genesis = Rollup::genesis();
        let b0 = block(None, 0, vec![publish(&genesis)]);
        let b1 = block(Some(&b0), 0, vec![]);
        store.store_block(&b0).unwrap();
        store.store_block(&b1).unwrap();
        update_state(&b1, &store, &stats).unwrap();

        let slow = Rollup::new(b0.hash(), &genesis, Address::ZERO, vec![], vec![], 1, vec![]);
        let fresh = Rollup::new(b1.hash(), &genesis, Address::ZERO, vec![], vec![], 9, vec![]);
        let b2 = block(Some(&b1), 0, vec![publish(&slow), publish(&fresh)]);
        store.store_block(&b2).unwrap();

        let bs = update_state(&b2, &store, &stats).unwrap().unwrap();
        assert_eq!(bs.head, fresh);
        assert_eq!(stats.snapshot().rollups_with_more_recent_proof, 1);
        assert!(store.exist_rollup(&slow.hash()).unwrap());
    }

    #[test]
    fn test_orphan_published_rollup_not_stored() {
        let store = ChainStore::in_memory();
        let genesis = Rollup::genesis();
        let b0 = block(None, 0, vec![publish(&genesis)]);
        store.store_block(&b0).unwrap();
        update_state(&b0, &store, &NoopStats).unwrap();

        let never_seen = Rollup::new(b0.hash(), &genesis, Address::ZERO, vec![], vec![], 4, vec![]);
        let unknown_parent =
            Rollup::new(b0.hash(), &never_seen, Address::ZERO, vec![], vec![], 0, vec![]);
        let b1 = block(Some(&b0), 0, vec![publish(&unknown_parent)]);
        store.store_block(&b1).unwrap();

        let bs = update_state(&b1, &store, &NoopStats).unwrap().unwrap();
        assert_eq!(bs.head, genesis);
        assert!(!store.exist_rollup(&unknown_parent.hash()).unwrap());
    }

    #[test]
    fn test_lookalike_genesis_does_not_seed_chain() {
        let store = ChainStore::in_memory();
        let mut forged = Rollup::genesis();
        forged.header.nonce = 99;
        let b0 = block(None, 0, vec![publish(&forged)]);
        store.store_block(&b0).unwrap();

        assert!(update_state(&b0, &store, &NoopStats).unwrap().is_none());
        assert!(!store.exist_rollup(&forged.hash()).unwrap());
        assert!(store.head().unwrap().is_none());
    }

    #[test]
    fn test_height_skipping_rollup_not_stored() {
        let store = ChainStore::in_memory();
        let genesis = Rollup::genesis();
        let b0 = block(None, 0, vec![publish(&genesis)]);
        store.store_block(&b0).unwrap();
        update_state(&b0, &store, &NoopStats).unwrap();

        let mut skipped =
            Rollup::new(b0.hash(), &genesis, Address::ZERO, vec![], vec![], 1, vec![]);
        skipped.header.height = 50;
        let b1 = block(Some(&b0), 0, vec![publish(&skipped)]);
        store.store_block(&b1).unwrap();

        let bs = update_state(&b1, &store, &NoopStats).unwrap().unwrap();
        assert_eq!(bs.head, genesis);
        assert!(!store.exist_rollup(&skipped.hash()).unwrap());
        assert_eq!(store.head().unwrap().unwrap(), genesis);
    }
}
