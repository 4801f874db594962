//! State Applier
//!
//! Pure functions folding transactions and L1 deposits into a ledger. The
//! same inputs always give the same state: speculative execution and the
//! authoritative recomputation both go through here.
//!
//! Deposits are always applied after the rollup's transactions.

use crate::chain_store::ChainStore;
use crate::error::{StoreError, StoreResult};
use crate::ledger::{ProcessedState, RollupState};
use crate::rollup::Rollup;
use crate::transaction::{L2Tx, TxKind};
use l1_integration::{Hash, L1Block};
use std::collections::HashSet;

/// Mutable working copy of a rollup's state
pub fn new_processed_state(state: &RollupState) -> ProcessedState {
    ProcessedState::from_rollup_state(state)
}

/// Deep, independent snapshot
pub fn copy_processed_state(state: &ProcessedState) -> ProcessedState {
    state.clone()
}

/// Apply one transaction in place. A transaction the sender cannot pay for
/// leaves the ledger untouched.
pub fn execute_tx(state: &mut ProcessedState, tx: &L2Tx) {
    match &tx.kind {
        TxKind::Transfer { to, amount } => {
            if state.debit(&tx.from, *amount) {
                state.credit(*to, *amount);
            } else {
                tracing::debug!(
                    "Skipping transfer {:?}: {:?} cannot pay {}",
                    tx.hash(),
                    tx.from,
                    amount
                );
            }
        }
        TxKind::Withdrawal { amount } => {
            if state.debit(&tx.from, *amount) {
                state.record_withdrawal(tx.from, *amount);
            } else {
                tracing::debug!(
                    "Skipping withdrawal {:?}: {:?} cannot pay {}",
                    tx.hash(),
                    tx.from,
                    amount
                );
            }
        }
    }
}

/// Fold transactions in order
pub fn execute_transactions(txs: &[L2Tx], mut state: ProcessedState) -> ProcessedState {
    for tx in txs {
        execute_tx(&mut state, tx);
    }
    state
}

/// Credit the deposits found in L1 blocks after `from` up to and including
/// `to`, oldest block first. Without `from` the walk goes down to the L1
/// genesis block. If `from` is not an ancestor of `to` the blocks are on
/// different L1 forks and nothing is credited.
pub fn process_deposits(
    from: Option<&L1Block>,
    to: &L1Block,
    mut state: ProcessedState,
    store: &ChainStore,
) -> StoreResult<ProcessedState> {
    if let Some(from) = from {
        if !store.is_ancestor(to, from)? {
            tracing::warn!(
                "Deposits can't be processed: b_{} is not an ancestor of b_{}",
                from.hash().short(),
                to.hash().short()
            );
            return Ok(state);
        }
    }

    let stop = from.map(L1Block::hash);
    let mut per_block = Vec::new();
    let mut current = to.clone();

    loop {
        if Some(current.hash()) == stop {
            break;
        }
        per_block.push(current.deposits().collect::<Vec<_>>());

        if current.is_genesis() {
            break;
        }
        current = store
            .parent_block(&current)?
            .ok_or(StoreError::Missing("block", current.parent_hash))?;
    }

    for (address, amount) in per_block.into_iter().rev().flatten() {
        state.credit(address, amount);
    }

    Ok(state)
}

/// L1 block a rollup's deposits are justified by (`None` for the zero proof)
pub fn proof_block(rollup: &Rollup, store: &ChainStore) -> StoreResult<Option<L1Block>> {
    let proof = rollup.proof_hash();
    if proof.is_zero() {
        return Ok(None);
    }
    match store.resolve_block(&proof)? {
        Some(block) => Ok(Some(block)),
        None => Err(StoreError::Missing("proof block", proof)),
    }
}

/// State of `rollup` given its parent and the parent's state: transactions
/// first, then deposits between the two proofs
pub fn apply_rollup(
    parent: &Rollup,
    parent_state: &RollupState,
    rollup: &Rollup,
    store: &ChainStore,
) -> StoreResult<RollupState> {
    let state = execute_transactions(&rollup.transactions, new_processed_state(parent_state));

    let from = proof_block(parent, store)?;
    let to = proof_block(rollup, store)?
        .ok_or(StoreError::Missing("proof block", rollup.proof_hash()))?;

    let state = process_deposits(from.as_ref(), &to, state, store)?;
    Ok(state.into_rollup_state())
}

/// Derived state of a rollup, computed from the closest known ancestor state
/// and cached on the way
pub fn rollup_state(rollup: &Rollup, store: &ChainStore) -> StoreResult<RollupState> {
    if let Some(state) = store.fetch_rollup_state(&rollup.hash())? {
        return Ok(state);
    }
    if rollup.is_genesis() {
        let state = RollupState::default();
        store.set_rollup_state(&rollup.hash(), &state)?;
        return Ok(state);
    }

    let mut pending = Vec::new();
    let mut current = rollup.clone();
    let (mut parent, mut parent_state) = loop {
        let parent = store
            .parent_rollup(&current)?
            .ok_or(StoreError::Missing("parent rollup", current.parent_hash()))?;
        pending.push(current);

        if let Some(state) = store.fetch_rollup_state(&parent.hash())? {
            break (parent, state);
        }
        if parent.is_genesis() {
            let state = RollupState::default();
            store.set_rollup_state(&parent.hash(), &state)?;
            break (parent, state);
        }
        current = parent;
    };

    for next in pending.into_iter().rev() {
        let state = apply_rollup(&parent, &parent_state, &next, store)?;
        store.set_rollup_state(&next.hash(), &state)?;
        parent = next;
        parent_state = state;
    }

    Ok(parent_state)
}

/// Hashes of every transaction included by `rollup` or its ancestors
pub fn all_included_transactions(
    rollup: &Rollup,
    store: &ChainStore,
) -> StoreResult<HashSet<Hash>> {
    let mut included = HashSet::new();
    let mut current = rollup.clone();
    loop {
        included.extend(current.transactions.iter().map(L2Tx::hash));
        match store.parent_rollup(&current)? {
            Some(parent) => current = parent,
            None if current.is_genesis() => return Ok(included),
            None => return Err(StoreError::Missing("parent rollup", current.parent_hash())),
        }
    }
}

/// Pending transactions not yet included in `head`'s chain, in pool order
pub fn current_txs(
    head: &Rollup,
    pending: Vec<L2Tx>,
    store: &ChainStore,
) -> StoreResult<Vec<L2Tx>> {
    let included = all_included_transactions(head, store)?;
    let mut seen = HashSet::new();
    Ok(pending
        .into_iter()
        .filter(|tx| {
            let hash = tx.hash();
            !included.contains(&hash) && seen.insert(hash)
        })
        .collect())
}

/// Transactions included at least `depth` rollups below `head`. These are
/// confirmed and can leave the pending pool.
pub fn historic_txs(head: &Rollup, depth: u64, store: &ChainStore) -> StoreResult<HashSet<Hash>> {
    let mut current = head.clone();
    for _ in 0..depth {
        match store.parent_rollup(&current)? {
            Some(parent) => current = parent,
            None => return Ok(HashSet::new()),
        }
    }
    all_included_transactions(&current, store)
}
