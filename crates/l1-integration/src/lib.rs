//! Shared types for L1/L2 integration
//!
//! The L1 client owns blocks; the enclave only references them by hash and
//! reads the events embedded in them (deposits and published rollups).

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Height of the first L1 block the network knows about
pub const L1_GENESIS_HEIGHT: u64 = 0;

/// Height of the genesis rollup
pub const L2_GENESIS_HEIGHT: u64 = 0;

/// 32-byte blake3 content hash
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The zero hash, used as "no parent" / "no proof"
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 4 bytes as a number, for compact log lines
    pub fn short(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl From<blake3::Hash> for Hash {
    fn from(h: blake3::Hash) -> Self {
        Self(*h.as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h_{}", self.short())
    }
}

/// Account identity: the raw bytes of an ed25519 public key
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn short(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a_{}", self.short())
    }
}

/// L1-level event embedded in a block
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum L1Event {
    /// Value locked on L1 that must be credited on L2
    Deposit { to: Address, amount: u64 },
    /// A rollup published to the management contract, borsh-encoded by the L2 side
    RollupPublished { rollup: Vec<u8> },
}

/// An L1 block as seen by the enclave
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct L1Block {
    /// Parent block hash (zero for the L1 genesis)
    pub parent_hash: Hash,
    /// Block height
    pub height: u64,
    /// Miner identity
    pub miner: Address,
    /// Proof-of-work nonce, only used to tell sibling blocks apart
    pub nonce: u64,
    /// Events in block order
    pub events: Vec<L1Event>,
}

impl L1Block {
    pub fn new(
        parent_hash: Hash,
        height: u64,
        miner: Address,
        nonce: u64,
        events: Vec<L1Event>,
    ) -> Self {
        Self {
            parent_hash,
            height,
            miner,
            nonce,
            events,
        }
    }

    /// Content hash of the block
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(&self.height.to_le_bytes());
        hasher.update(self.miner.as_bytes());
        hasher.update(&self.nonce.to_le_bytes());

        for event in &self.events {
            let bytes = borsh::to_vec(event).expect("L1Event serialization should not fail");
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }

        hasher.finalize().into()
    }

    /// Deposits carried by this block, in event order
    pub fn deposits(&self) -> impl Iterator<Item = (Address, u64)> + '_ {
        self.events.iter().filter_map(|e| match e {
            L1Event::Deposit { to, amount } => Some((*to, *amount)),
            _ => None,
        })
    }

    /// Raw payloads of rollups published in this block
    pub fn published_rollups(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.events.iter().filter_map(|e| match e {
            L1Event::RollupPublished { rollup } => Some(rollup.as_slice()),
            _ => None,
        })
    }

    pub fn is_genesis(&self) -> bool {
        self.height == L1_GENESIS_HEIGHT
    }
}
