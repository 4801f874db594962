//! L2 transactions
//!
//! A transaction is signed by the sender's ed25519 key over the chain id and
//! its contents. The hash covers the signature as well, so two signatures
//! over the same payload are two different transactions.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use l1_integration::{Address, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chain id of the L2 network; transactions signed for any other id are rejected
pub const CHAIN_ID: u64 = 777;

/// Transaction validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction signed for chain {got}, expected {expected}")]
    WrongChainId { expected: u64, got: u64 },

    #[error("sender is not a valid ed25519 public key")]
    MalformedSender,

    #[error("malformed signature")]
    MalformedSignature,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("could not decode envelope: {0}")]
    Decode(String),
}

/// What a transaction does to the ledger
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum TxKind {
    /// Move value to another L2 account
    Transfer { to: Address, amount: u64 },
    /// Burn value on L2 so it can be claimed on L1
    Withdrawal { amount: u64 },
}

/// A signed L2 transaction
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct L2Tx {
    pub chain_id: u64,
    /// Sender, also the verifying key
    pub from: Address,
    /// Sender-chosen sequence number, makes repeated transfers distinct
    pub nonce: u64,
    pub kind: TxKind,
    /// ed25519 signature over `signing_payload`
    pub signature: Vec<u8>,
}

impl L2Tx {
    /// Create and sign a transaction
    pub fn new_signed(key: &SigningKey, chain_id: u64, nonce: u64, kind: TxKind) -> Self {
        let mut tx = Self {
            chain_id,
            from: address_of(key),
            nonce,
            kind,
            signature: Vec::new(),
        };
        tx.signature = key.sign(&tx.signing_payload()).to_bytes().to_vec();
        tx
    }

    /// Convenience constructor for a transfer on the default chain
    pub fn transfer(key: &SigningKey, nonce: u64, to: Address, amount: u64) -> Self {
        Self::new_signed(key, CHAIN_ID, nonce, TxKind::Transfer { to, amount })
    }

    /// Convenience constructor for a withdrawal on the default chain
    pub fn withdrawal(key: &SigningKey, nonce: u64, amount: u64) -> Self {
        Self::new_signed(key, CHAIN_ID, nonce, TxKind::Withdrawal { amount })
    }

    /// Bytes covered by the signature
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(96);
        payload.extend_from_slice(&self.chain_id.to_le_bytes());
        payload.extend_from_slice(self.from.as_bytes());
        payload.extend_from_slice(&self.nonce.to_le_bytes());
        payload.extend(borsh::to_vec(&self.kind).expect("TxKind serialization should not fail"));
        payload
    }

    /// Signed hash, the identity of the transaction everywhere in the enclave
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.signing_payload());
        hasher.update(&self.signature);
        hasher.finalize().into()
    }

    /// Check the signature against the sender key for the given chain
    pub fn verify(&self, chain_id: u64) -> Result<(), TxError> {
        if self.chain_id != chain_id {
            return Err(TxError::WrongChainId {
                expected: chain_id,
                got: self.chain_id,
            });
        }

        let key = VerifyingKey::from_bytes(self.from.as_bytes())
            .map_err(|_| TxError::MalformedSender)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| TxError::MalformedSignature)?;

        key.verify_strict(&self.signing_payload(), &signature)
            .map_err(|_| TxError::InvalidSignature)
    }
}

/// Address controlled by a signing key
pub fn address_of(key: &SigningKey) -> Address {
    Address(key.verifying_key().to_bytes())
}

/// Transaction as it travels between the host and the enclave.
///
/// No encryption is applied yet; the envelope is the borsh encoding of the
/// transaction and `seal`/`open` are the points where a cipher plugs in.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedTx(pub Vec<u8>);

impl EncryptedTx {
    pub fn seal(tx: &L2Tx) -> Self {
        Self(borsh::to_vec(tx).expect("L2Tx serialization should not fail"))
    }

    pub fn open(&self) -> Result<L2Tx, TxError> {
        borsh::from_slice(&self.0).map_err(|e| TxError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_sign_and_verify() {
        let alice = key(1);
        let bob = address_of(&key(2));
        let tx = L2Tx::transfer(&alice, 0, bob, 10);

        assert_eq!(tx.from, address_of(&alice));
        assert!(tx.verify(CHAIN_ID).is_ok());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut tx = L2Tx::transfer(&key(1), 0, address_of(&key(2)), 10);
        tx.signature[3] ^= 0x01;
        assert_eq!(tx.verify(CHAIN_ID), Err(TxError::InvalidSignature));
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let mut tx = L2Tx::transfer(&key(1), 0, address_of(&key(2)), 10);
        tx.kind = TxKind::Transfer {
            to: address_of(&key(2)),
            amount: 1_000,
        };
        assert_eq!(tx.verify(CHAIN_ID), Err(TxError::InvalidSignature));
    }

    #[test]
    fn test_wrong_chain_rejected() {
        let tx = L2Tx::new_signed(&key(1), 1, 0, TxKind::Withdrawal { amount: 1 });
        assert_eq!(
            tx.verify(CHAIN_ID),
            Err(TxError::WrongChainId {
                expected: CHAIN_ID,
                got: 1
            })
        );
    }

    #[test]
    fn test_hash_distinguishes_nonce() {
        let alice = key(1);
        let bob = address_of(&key(2));
        assert_ne!(
            L2Tx::transfer(&alice, 0, bob, 10).hash(),
            L2Tx::transfer(&alice, 1, bob, 10).hash()
        );
    }

    #[test]
    fn test_envelope_open() {
        let tx = L2Tx::withdrawal(&key(4), 9, 3);
        assert_eq!(EncryptedTx::seal(&tx).open().unwrap(), tx);
        assert!(matches!(
            EncryptedTx(vec![0xff]).open(),
            Err(TxError::Decode(_))
        ));
    }
}
