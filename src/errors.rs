use thiserror::Error;

use crate::conflict::detection::ConflictType;
use crate::transaction::TransactionStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThothError {
    #[error("Transaction {id} is dead ({status:?})")]
    DeadTransaction { id: u64, status: TransactionStatus },

    #[error("Transaction {id} is already prepared")]
    PreparedTransaction { id: u64 },

    #[error("Read conflict detected: {0}")]
    ReadConflict(ConflictType),

    #[error("Read/write conflict detected while committing transaction {id}")]
    ReadWriteConflict { id: u64 },

    #[error("Speculative configuration failure: transaction needs room for {required} cells")]
    SpeculativeConfigurationFailure { required: usize },

    #[error("Transaction {id} can't block: nothing was read that could change")]
    NoRetryPossible { id: u64 },

    #[error("Transaction {id} is not allowed to block")]
    NoBlockingAllowed { id: u64 },

    #[error("Transaction {id} is readonly")]
    ReadonlyViolation { id: u64 },

    #[error("Retry requested")]
    Retry,

    #[error("Transaction {id} timed out while waiting for a change")]
    RetryTimeout { id: u64 },

    #[error("Atomic block '{family}' gave up after {max_retries} retries")]
    TooManyRetries { family: String, max_retries: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bad reference: {0}")]
    BadReference(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ThothError {
    /// Conflicts are transient: the atomic block backs off and runs the closure again.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ThothError::ReadConflict(_) | ThothError::ReadWriteConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ThothError>;
