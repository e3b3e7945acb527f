//! Store module
//!
//! Persistence seams for accounts and their transactions.
//!
//! Mutations go through a [`UnitOfWork`]: it holds the exclusive per-account
//! hold, stages account and idempotency writes, and commits them together.
//! Dropping a unit of work without committing discards everything it staged
//! and releases its holds. Reads go straight to the [`LedgerRepository`] and
//! never take a hold.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::Account;
use crate::domain::{TimeRange, Transaction};
use crate::idempotency::IdempotencyStore;

pub use error::StoreError;
pub use memory::{InMemoryLedgerStore, InMemoryUnitOfWork};
pub use postgres::{PgLedgerStore, PgUnitOfWork};

/// Account persistence inside a unit of work
#[async_trait]
pub trait AccountStore: Send {
    /// Load the account and hold it exclusively until the unit of work ends.
    ///
    /// Blocks while another unit of work holds the same account, up to the
    /// store's lock timeout. Holds on other accounts never interfere.
    async fn acquire_exclusive(&mut self, account_id: Uuid) -> Result<Account, StoreError>;

    /// Persist balance and version, appending transactions not yet stored
    async fn save(&mut self, account: &Account) -> Result<(), StoreError>;
}

/// Atomic scope for one mutating ledger operation
#[async_trait]
pub trait UnitOfWork: AccountStore + IdempotencyStore + Send {
    /// Make every staged write durable and release all holds
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard staged writes and release all holds
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Entry point to a ledger storage backend
#[async_trait]
pub trait LedgerRepository: Send + Sync + 'static {
    type Work: UnitOfWork + 'static;

    /// Start a new unit of work
    async fn begin(&self) -> Result<Self::Work, StoreError>;

    /// Load current account state without exclusivity
    async fn find_read_only(&self, account_id: Uuid) -> Result<Account, StoreError>;

    /// Transactions within `range` (inclusive), newest first
    async fn find_transactions(
        &self,
        account_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Insert a freshly opened account
    async fn open_account(&self, account: &Account) -> Result<(), StoreError>;
}
