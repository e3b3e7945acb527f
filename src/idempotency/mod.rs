//! Idempotency module
//!
//! Prevents duplicate application of retried operations using caller-supplied
//! operation ids.

mod repository;

use async_trait::async_trait;
use uuid::Uuid;

use crate::store::StoreError;

pub use repository::{operation_exists, record_operation};

/// Durable set of operation ids that have been fully applied.
///
/// Both calls run inside the unit of work that performs the guarded balance
/// change, so the marker commits or aborts together with it.
#[async_trait]
pub trait IdempotencyStore: Send {
    /// Whether `operation_id` has already been applied. No side effects.
    async fn exists(&mut self, operation_id: Uuid) -> Result<bool, StoreError>;

    /// Remember `operation_id` as applied.
    ///
    /// Fails with `StoreError::DuplicateOperation` when the id is already
    /// recorded, including by a unit of work that committed after this one's
    /// `exists` check.
    async fn record(&mut self, operation_id: Uuid) -> Result<(), StoreError>;
}
