//! Shared-secret bootstrap
//!
//! The genesis node generates the network secret; every other node obtains
//! it from a peer after presenting an attestation report. Sealing the
//! secret for transport is an identity transform here: the transport
//! cryptography and the report verification live outside the enclave core.

use l1_integration::Address;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SECRET_LEN: usize = 32;

/// The network-wide secret. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SECRET_LEN]);

impl SharedSecret {
    /// Fresh secret from the OS random source
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// Seal for transport to a peer
    pub fn seal(&self) -> EncryptedSharedSecret {
        EncryptedSharedSecret(self.0.to_vec())
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Secret as it travels between enclaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSharedSecret(pub Vec<u8>);

impl EncryptedSharedSecret {
    /// `None` if the payload is not a sealed secret
    pub fn open(&self) -> Option<SharedSecret> {
        let bytes: [u8; SECRET_LEN] = self.0.as_slice().try_into().ok()?;
        Some(SharedSecret(bytes))
    }
}

/// Evidence an enclave presents to obtain the shared secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationReport {
    /// Node the report was produced by
    pub owner: Address,
}
