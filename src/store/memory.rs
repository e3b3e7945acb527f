//! In-memory Ledger Store
//!
//! Single-process backend. Exclusive holds are per-account
//! `tokio::sync::Mutex`es kept in a registry keyed by account id; a unit of
//! work stages its writes and applies them under one state write lock at
//! commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::aggregate::Account;
use crate::domain::{TimeRange, Transaction};
use crate::idempotency::IdempotencyStore;

use super::{AccountStore, LedgerRepository, StoreError, UnitOfWork};

#[derive(Debug, Clone, Copy)]
struct AccountRecord {
    balance: Decimal,
    version: i64,
    last_transaction_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Uuid, AccountRecord>,
    transactions: HashMap<Uuid, Vec<Transaction>>,
    transaction_ids: HashSet<Uuid>,
    operations: HashMap<Uuid, DateTime<Utc>>,
}

impl LedgerState {
    fn load(&self, account_id: Uuid) -> Result<Account, StoreError> {
        let record = self
            .accounts
            .get(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;

        Account::rehydrate(
            account_id,
            record.balance,
            record.version,
            record.last_transaction_at,
        )
        .map_err(|e| StoreError::InvalidState(format!("account {}: {}", account_id, e)))
    }

    fn has_transaction(&self, transaction_id: Uuid) -> bool {
        self.transaction_ids.contains(&transaction_id)
    }
}

type LockRegistry = Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>;

/// In-memory ledger repository.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    locks: Arc<LockRegistry>,
    lock_timeout: Duration,
}

impl InMemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            lock_timeout,
        }
    }

    /// Whether an operation id has been committed
    pub fn has_operation(&self, operation_id: Uuid) -> Result<bool, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.operations.contains_key(&operation_id))
    }

    fn account_lock(&self, account_id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locks.entry(account_id).or_default().clone())
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Staged writes plus the holds taken so far
pub struct InMemoryUnitOfWork {
    store: InMemoryLedgerStore,
    holds: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged_accounts: HashMap<Uuid, AccountRecord>,
    staged_transactions: Vec<Transaction>,
    staged_operations: HashSet<Uuid>,
}

impl InMemoryUnitOfWork {
    fn staged_transaction(&self, transaction_id: Uuid) -> bool {
        self.staged_transactions.iter().any(|t| t.id == transaction_id)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerStore {
    type Work = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork, StoreError> {
        Ok(InMemoryUnitOfWork {
            store: self.clone(),
            holds: HashMap::new(),
            staged_accounts: HashMap::new(),
            staged_transactions: Vec::new(),
            staged_operations: HashSet::new(),
        })
    }

    async fn find_read_only(&self, account_id: Uuid) -> Result<Account, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        state.load(account_id)
    }

    async fn find_transactions(
        &self,
        account_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;

        let mut lines: Vec<Transaction> = state
            .transactions
            .get(&account_id)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|t| range.contains(t.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        lines.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        Ok(lines)
    }

    async fn open_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        if state.accounts.contains_key(&account.id()) {
            return Err(StoreError::AccountAlreadyExists(account.id()));
        }

        state.accounts.insert(
            account.id(),
            AccountRecord {
                balance: account.balance().value(),
                version: account.version(),
                last_transaction_at: account.last_transaction_at(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryUnitOfWork {
    async fn acquire_exclusive(&mut self, account_id: Uuid) -> Result<Account, StoreError> {
        if !self.holds.contains_key(&account_id) {
            // Unknown ids never get a registry entry
            self.store.find_read_only(account_id).await?;

            let lock = self.store.account_lock(account_id)?;
            let timeout = self.store.lock_timeout;
            let guard = tokio::time::timeout(timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    tracing::warn!(%account_id, "Lock timeout waiting for account hold");
                    StoreError::LockTimeout {
                        account_id,
                        waited_ms: timeout.as_millis() as u64,
                    }
                })?;
            self.holds.insert(account_id, guard);
        }

        if let Some(record) = self.staged_accounts.get(&account_id) {
            return Account::rehydrate(
                account_id,
                record.balance,
                record.version,
                record.last_transaction_at,
            )
            .map_err(|e| StoreError::InvalidState(e.to_string()));
        }

        // Read after the hold is granted so the previous holder's commit is visible
        self.store.find_read_only(account_id).await
    }

    async fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        let fresh: Vec<Transaction> = {
            let state = self.store.state.read().map_err(|_| StoreError::Poisoned)?;
            if !state.accounts.contains_key(&account.id()) {
                return Err(StoreError::AccountNotFound(account.id()));
            }

            account
                .transactions()
                .iter()
                .filter(|t| !state.has_transaction(t.id))
                .cloned()
                .collect()
        };

        for transaction in fresh {
            if !self.staged_transaction(transaction.id) {
                self.staged_transactions.push(transaction);
            }
        }

        self.staged_accounts.insert(
            account.id(),
            AccountRecord {
                balance: account.balance().value(),
                version: account.version(),
                last_transaction_at: account.last_transaction_at(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryUnitOfWork {
    async fn exists(&mut self, operation_id: Uuid) -> Result<bool, StoreError> {
        if self.staged_operations.contains(&operation_id) {
            return Ok(true);
        }
        self.store.has_operation(operation_id)
    }

    async fn record(&mut self, operation_id: Uuid) -> Result<(), StoreError> {
        if self.store.has_operation(operation_id)? {
            return Err(StoreError::DuplicateOperation(operation_id));
        }
        self.staged_operations.insert(operation_id);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> Result<(), StoreError> {
        {
            let mut state = self.store.state.write().map_err(|_| StoreError::Poisoned)?;

            // Another unit of work may have committed the same id since `record`
            if let Some(taken) = self
                .staged_operations
                .iter()
                .find(|id| state.operations.contains_key(*id))
            {
                return Err(StoreError::DuplicateOperation(*taken));
            }

            for (account_id, record) in self.staged_accounts.drain() {
                state.accounts.insert(account_id, record);
            }

            for transaction in self.staged_transactions.drain(..) {
                if state.transaction_ids.insert(transaction.id) {
                    state
                        .transactions
                        .entry(transaction.account_id)
                        .or_default()
                        .push(transaction);
                }
            }

            let now = Utc::now();
            for operation_id in self.staged_operations.drain() {
                state.operations.insert(operation_id, now);
            }
        }

        // Holds are released only after the writes are visible
        self.holds.clear();
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store_with_account() -> (InMemoryLedgerStore, Uuid) {
        let store = InMemoryLedgerStore::new(Duration::from_millis(50));
        let account_id = Uuid::new_v4();
        store.open_account(&Account::open(account_id)).await.unwrap();
        (store, account_id)
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let (store, account_id) = store_with_account().await;
        let operation_id = Uuid::new_v4();

        let mut work = store.begin().await.unwrap();
        let mut account = work.acquire_exclusive(account_id).await.unwrap();
        account.deposit(dec!(10)).unwrap();
        work.save(&account).await.unwrap();
        work.record(operation_id).await.unwrap();
        assert!(work.exists(operation_id).await.unwrap());
        work.commit().await.unwrap();

        let loaded = store.find_read_only(account_id).await.unwrap();
        assert_eq!(loaded.balance().value(), dec!(10));
        assert_eq!(loaded.version(), 1);
        assert!(store.has_operation(operation_id).unwrap());
        assert_eq!(
            store.find_transactions(account_id, TimeRange::all()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_persists_nothing() {
        let (store, account_id) = store_with_account().await;
        let operation_id = Uuid::new_v4();

        {
            let mut work = store.begin().await.unwrap();
            let mut account = work.acquire_exclusive(account_id).await.unwrap();
            account.deposit(dec!(10)).unwrap();
            work.save(&account).await.unwrap();
            work.record(operation_id).await.unwrap();
        }

        let loaded = store.find_read_only(account_id).await.unwrap();
        assert_eq!(loaded.balance().value(), Decimal::ZERO);
        assert!(!store.has_operation(operation_id).unwrap());

        // The hold was released with the dropped unit of work
        let mut work = store.begin().await.unwrap();
        assert!(work.acquire_exclusive(account_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_hold_times_out() {
        let (store, account_id) = store_with_account().await;

        let mut first = store.begin().await.unwrap();
        first.acquire_exclusive(account_id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.acquire_exclusive(account_id).await.unwrap_err();
        assert!(err.is_lock_timeout());

        first.rollback().await.unwrap();
        assert!(second.acquire_exclusive(account_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_holds_are_per_account() {
        let (store, first_id) = store_with_account().await;
        let second_id = Uuid::new_v4();
        store.open_account(&Account::open(second_id)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.acquire_exclusive(first_id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        assert!(second.acquire_exclusive(second_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let store = InMemoryLedgerStore::default();
        let missing = Uuid::new_v4();

        let mut work = store.begin().await.unwrap();
        assert!(matches!(
            work.acquire_exclusive(missing).await,
            Err(StoreError::AccountNotFound(id)) if id == missing
        ));
        assert!(matches!(
            store.find_read_only(missing).await,
            Err(StoreError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_merges_by_transaction_id() {
        let (store, account_id) = store_with_account().await;

        let mut work = store.begin().await.unwrap();
        let mut account = work.acquire_exclusive(account_id).await.unwrap();
        account.deposit(dec!(5)).unwrap();
        work.save(&account).await.unwrap();
        work.save(&account).await.unwrap();
        work.commit().await.unwrap();

        let lines = store.find_transactions(account_id, TimeRange::all()).await.unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_same_operation_on_two_accounts_commits_once() {
        let (store, first_id) = store_with_account().await;
        let second_id = Uuid::new_v4();
        store.open_account(&Account::open(second_id)).await.unwrap();
        let operation_id = Uuid::new_v4();

        // Both pass the existence check before either commits
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.acquire_exclusive(first_id).await.unwrap();
        let mut b = second.acquire_exclusive(second_id).await.unwrap();
        assert!(!first.exists(operation_id).await.unwrap());
        assert!(!second.exists(operation_id).await.unwrap());

        a.deposit(dec!(50)).unwrap();
        b.deposit(dec!(50)).unwrap();
        first.save(&a).await.unwrap();
        second.save(&b).await.unwrap();
        first.record(operation_id).await.unwrap();
        second.record(operation_id).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::DuplicateOperation(id)) if id == operation_id
        ));

        assert_eq!(store.find_read_only(first_id).await.unwrap().balance().value(), dec!(50));
        assert_eq!(store.find_read_only(second_id).await.unwrap().balance().value(), Decimal::ZERO);
        assert!(store
            .find_transactions(second_id, TimeRange::all())
            .await
            .unwrap()
            .is_empty());

        // The losing unit of work released its hold
        let mut work = store.begin().await.unwrap();
        assert!(work.acquire_exclusive(second_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_rejects_committed_operation() {
        let (store, account_id) = store_with_account().await;
        let operation_id = Uuid::new_v4();

        let mut work = store.begin().await.unwrap();
        work.record(operation_id).await.unwrap();
        work.commit().await.unwrap();

        let mut work = store.begin().await.unwrap();
        work.acquire_exclusive(account_id).await.unwrap();
        assert!(matches!(
            work.record(operation_id).await,
            Err(StoreError::DuplicateOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_open_account_twice_fails() {
        let (store, account_id) = store_with_account().await;

        let result = store.open_account(&Account::open(account_id)).await;
        assert!(matches!(result, Err(StoreError::AccountAlreadyExists(_))));
    }
}
