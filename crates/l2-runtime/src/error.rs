use l1_integration::Hash;
use thiserror::Error;

/// Result type used across the storage and state-derivation layer
pub type StoreResult<T> = Result<T, StoreError>;

/// Faults of the chain store. Any of these means the store can no longer be
/// trusted for the operation at hand.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),

    #[error("missing {0} {1}")]
    Missing(&'static str, Hash),

    #[error("rollup {0} does not extend a stored parent")]
    Detached(Hash),
}
