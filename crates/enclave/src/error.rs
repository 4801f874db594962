use l1_integration::Hash;
use l2_runtime::{ExecutorError, StoreError, TxError};
use thiserror::Error;

pub type EnclaveResult<T> = Result<T, EnclaveError>;

/// Errors surfaced by the enclave façade
#[derive(Debug, Error)]
pub enum EnclaveError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TxError),

    #[error("enclave holds no shared secret")]
    NotInitialised,

    #[error("shared secret payload is malformed")]
    MalformedSecret,

    #[error("speculative executor: {0}")]
    Executor(#[from] ExecutorError),

    #[error("no L2 state for block {0:?}")]
    MissingBlockState(Hash),

    #[error("failed to spawn speculative executor: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("panic during block submission: {0}")]
    Panic(String),
}
