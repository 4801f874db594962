//! Account-balance ledger
//!
//! `RollupState` is the immutable snapshot persisted per rollup.
//! `ProcessedState` is the working copy transactions and deposits are folded
//! into; cloning it yields a fully independent snapshot.

use crate::rollup::Withdrawal;
use l1_integration::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived state of a rollup: balances after replaying its ancestor chain,
/// plus the withdrawals made by the rollup itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupState {
    pub balances: BTreeMap<Address, u64>,
    pub withdrawals: Vec<Withdrawal>,
}

impl RollupState {
    /// Balance of an account (0 if it never received anything)
    pub fn balance(&self, address: &Address) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Serialized balances, the post-state blob carried in rollup headers
    pub fn state_blob(&self) -> Vec<u8> {
        state_blob(&self.balances)
    }
}

/// Mutable working copy of a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedState {
    balances: BTreeMap<Address, u64>,
    withdrawals: Vec<Withdrawal>,
}

impl ProcessedState {
    /// Start from a rollup's balances with an empty withdrawal list
    pub fn from_rollup_state(state: &RollupState) -> Self {
        Self {
            balances: state.balances.clone(),
            withdrawals: Vec::new(),
        }
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, address: Address, amount: u64) {
        let balance = self.balances.entry(address).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Debit an account, returns false (and changes nothing) if funds are insufficient
    pub fn debit(&mut self, address: &Address, amount: u64) -> bool {
        match self.balances.get_mut(address) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                true
            }
            _ => amount == 0,
        }
    }

    pub fn record_withdrawal(&mut self, address: Address, amount: u64) {
        self.withdrawals.push(Withdrawal { address, amount });
    }

    pub fn withdrawals(&self) -> &[Withdrawal] {
        &self.withdrawals
    }

    pub fn state_blob(&self) -> Vec<u8> {
        state_blob(&self.balances)
    }

    pub fn into_rollup_state(self) -> RollupState {
        RollupState {
            balances: self.balances,
            withdrawals: self.withdrawals,
        }
    }
}

fn state_blob(balances: &BTreeMap<Address, u64>) -> Vec<u8> {
    borsh::to_vec(balances).expect("balance serialization should not fail")
}
