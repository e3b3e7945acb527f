//! Store Errors
//!
//! Error types for account and idempotency persistence.

use uuid::Uuid;

/// Errors that can occur in the ledger stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No account with this id
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    /// Account id already taken
    #[error("Account already exists: {0}")]
    AccountAlreadyExists(Uuid),

    /// Exclusive hold not granted within the configured timeout
    #[error("Timed out after {waited_ms}ms waiting for exclusive hold on account {account_id}")]
    LockTimeout { account_id: Uuid, waited_ms: u64 },

    /// Operation id already recorded by another unit of work
    #[error("Operation already recorded: {0}")]
    DuplicateOperation(Uuid),

    /// Persisted data violates a ledger invariant
    #[error("Invalid stored state: {0}")]
    InvalidState(String),

    /// In-memory state lock poisoned by a panicking writer
    #[error("Ledger state lock poisoned")]
    Poisoned,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if this error is a lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }

    /// Infrastructure failures the caller may retry. The ledger itself never does.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. } | StoreError::Database(_)
        )
    }
}
