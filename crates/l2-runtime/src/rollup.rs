//! Rollups: the L2 unit of consensus
//!
//! A rollup is immutable once built. Its hash is the header hash, and the
//! header commits to the transaction list through `tx_root`.

use crate::ledger::RollupState;
use crate::transaction::{EncryptedTx, L2Tx, TxError};
use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::{Address, Hash, L2_GENESIS_HEIGHT};
use serde::{Deserialize, Serialize};

/// Value leaving L2, claimable on L1
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Withdrawal {
    pub address: Address,
    pub amount: u64,
}

/// Rollup header
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RollupHeader {
    /// Parent rollup hash (zero for genesis)
    pub parent_hash: Hash,
    /// Parent height + 1
    pub height: u64,
    /// Producing node
    pub agg: Address,
    /// Random priority value used to rank competing rollups
    pub nonce: u64,
    /// L1 block whose state justifies this rollup's deposits (zero for genesis)
    pub l1_proof: Hash,
    /// Serialized post-state
    pub state: Vec<u8>,
    /// Withdrawals made by this rollup's transactions
    pub withdrawals: Vec<Withdrawal>,
    /// Commitment to the transaction list
    pub tx_root: Hash,
}

impl RollupHeader {
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(&self.height.to_le_bytes());
        hasher.update(self.agg.as_bytes());
        hasher.update(&self.nonce.to_le_bytes());
        hasher.update(self.l1_proof.as_bytes());
        hasher.update(&(self.state.len() as u64).to_le_bytes());
        hasher.update(&self.state);

        for w in &self.withdrawals {
            hasher.update(w.address.as_bytes());
            hasher.update(&w.amount.to_le_bytes());
        }

        hasher.update(self.tx_root.as_bytes());
        hasher.finalize().into()
    }
}

/// A rollup with its decrypted transactions
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Rollup {
    pub header: RollupHeader,
    pub transactions: Vec<L2Tx>,
}

impl Rollup {
    /// Build a rollup on top of `parent`, justified by the L1 block `proof`
    pub fn new(
        proof: Hash,
        parent: &Rollup,
        agg: Address,
        transactions: Vec<L2Tx>,
        withdrawals: Vec<Withdrawal>,
        nonce: u64,
        state: Vec<u8>,
    ) -> Self {
        let header = RollupHeader {
            parent_hash: parent.hash(),
            height: parent.height() + 1,
            agg,
            nonce,
            l1_proof: proof,
            state,
            withdrawals,
            tx_root: tx_root(&transactions),
        };
        Self {
            header,
            transactions,
        }
    }

    /// The fixed genesis rollup shared by every node of the network
    pub fn genesis() -> Self {
        let transactions = Vec::new();
        Self {
            header: RollupHeader {
                parent_hash: Hash::ZERO,
                height: L2_GENESIS_HEIGHT,
                agg: Address::ZERO,
                nonce: 0,
                l1_proof: Hash::ZERO,
                state: RollupState::default().state_blob(),
                withdrawals: Vec::new(),
                tx_root: tx_root(&transactions),
            },
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn proof_hash(&self) -> Hash {
        self.header.l1_proof
    }

    /// True only for the network's fixed genesis descriptor
    pub fn is_genesis(&self) -> bool {
        self.header.height == L2_GENESIS_HEIGHT && self.hash() == Self::genesis().hash()
    }

    /// Wire form for gossip and L1 publication
    pub fn to_ext(&self) -> ExtRollup {
        ExtRollup {
            header: self.header.clone(),
            txs: self.transactions.iter().map(EncryptedTx::seal).collect(),
        }
    }

    /// Decrypt a wire rollup, checking the transaction list against the header
    pub fn from_ext(ext: &ExtRollup) -> Result<Self, TxError> {
        let transactions = ext
            .txs
            .iter()
            .map(EncryptedTx::open)
            .collect::<Result<Vec<_>, _>>()?;

        if tx_root(&transactions) != ext.header.tx_root {
            return Err(TxError::Decode("transaction root mismatch".to_string()));
        }

        Ok(Self {
            header: ext.header.clone(),
            transactions,
        })
    }

    /// Encoded form carried by an L1 `RollupPublished` event
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_ext().to_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TxError> {
        let ext = ExtRollup::from_bytes(data).map_err(|e| TxError::Decode(e.to_string()))?;
        Self::from_ext(&ext)
    }
}

/// Rollup as exchanged outside the enclave, with sealed transactions
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ExtRollup {
    pub header: RollupHeader,
    pub txs: Vec<EncryptedTx>,
}

impl ExtRollup {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ExtRollup serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Hash over the ordered transaction hashes
pub fn tx_root(transactions: &[L2Tx]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(transactions.len() as u64).to_le_bytes());
    for tx in transactions {
        hasher.update(tx.hash().as_bytes());
    }
    hasher.finalize().into()
}
