//! Ledger Service
//!
//! Orchestrates deposits and withdrawals: structural validation, the
//! exclusive account hold, the idempotency check, the aggregate operation and
//! the atomic commit. Reads bypass the hold.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::Account;
use crate::domain::{TimeRange, Transaction, TransactionType};
use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyStore;
use crate::store::{AccountStore, LedgerRepository, StoreError, UnitOfWork};

use super::commands::{DepositCommand, ValidMutation, WithdrawCommand};

/// Result of a deposit or withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub account_id: Uuid,
    /// Balance after the call; the current balance on replay
    pub balance: Decimal,
    /// False when the operation id had already been applied
    pub applied: bool,
}

/// Current balance of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub account_id: Uuid,
    pub balance: Decimal,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id(),
            balance: account.balance().value(),
        }
    }
}

/// Ledger Service
pub struct LedgerService<S> {
    store: S,
}

impl<S: LedgerRepository> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Credit an account once per operation id
    pub async fn deposit(&self, command: DepositCommand) -> AppResult<MutationOutcome> {
        let mutation = ValidMutation::try_from(command)?;
        self.apply(TransactionType::Deposit, mutation).await
    }

    /// Debit an account once per operation id, never below zero
    pub async fn withdraw(&self, command: WithdrawCommand) -> AppResult<MutationOutcome> {
        let mutation = ValidMutation::try_from(command)?;
        self.apply(TransactionType::Withdrawal, mutation).await
    }

    async fn apply(
        &self,
        kind: TransactionType,
        mutation: ValidMutation,
    ) -> AppResult<MutationOutcome> {
        let ValidMutation {
            account_id,
            amount,
            operation_id,
        } = mutation;

        let mut work = self.store.begin().await?;

        let mut account = work
            .acquire_exclusive(account_id)
            .await
            .map_err(|e| AppError::from(e).with_operation(operation_id))?;

        if work.exists(operation_id).await? {
            tracing::debug!(
                %account_id,
                %operation_id,
                kind = %kind,
                "Operation already applied, returning current balance"
            );
            work.rollback().await?;

            return Ok(MutationOutcome {
                account_id,
                balance: account.balance().value(),
                applied: false,
            });
        }

        let applied = match kind {
            TransactionType::Deposit => account.deposit(amount),
            TransactionType::Withdrawal => account.withdraw(amount),
        }
        .map(|tx| (tx.id, tx.sequence));

        let (transaction_id, sequence) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(%account_id, %operation_id, kind = %kind, "Rejected: {}", e);
                if let Err(rollback_err) = work.rollback().await {
                    tracing::error!(%account_id, "Rollback failed: {}", rollback_err);
                }
                return Err(e.into());
            }
        };

        match Self::persist(work, &account, operation_id).await {
            Ok(()) => {}
            Err(StoreError::DuplicateOperation(_)) => {
                // Lost the race to a unit of work holding a different account
                tracing::debug!(
                    %account_id,
                    %operation_id,
                    kind = %kind,
                    "Operation applied concurrently, discarding"
                );
                let current = self.store.find_read_only(account_id).await?;

                return Ok(MutationOutcome {
                    account_id,
                    balance: current.balance().value(),
                    applied: false,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            %account_id,
            %operation_id,
            %transaction_id,
            sequence,
            kind = %kind,
            amount = %amount,
            balance = %account.balance(),
            "Operation applied"
        );

        Ok(MutationOutcome {
            account_id,
            balance: account.balance().value(),
            applied: true,
        })
    }

    /// Save, mark and commit; an error drops the unit of work and with it
    /// every staged write
    async fn persist(
        mut work: S::Work,
        account: &Account,
        operation_id: Uuid,
    ) -> Result<(), StoreError> {
        work.save(account).await?;
        work.record(operation_id).await?;
        work.commit().await
    }

    /// Open a zero-balance account with the given or a generated id
    pub async fn open_account(&self, account_id: Option<Uuid>) -> AppResult<AccountView> {
        let account_id = account_id.unwrap_or_else(Uuid::new_v4);
        if account_id.is_nil() {
            return Err(AppError::InvalidRequest("accountId must not be nil".to_string()));
        }

        let account = Account::open(account_id);
        self.store.open_account(&account).await?;

        tracing::info!(%account_id, "Account opened");
        Ok(AccountView::from(&account))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current balance, without taking the hold
    pub async fn get_balance(&self, account_id: Uuid) -> AppResult<AccountView> {
        let account = self.store.find_read_only(account_id).await?;
        Ok(AccountView::from(&account))
    }

    /// Transactions with `from <= timestamp <= to`, newest first
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Transaction>> {
        self.transactions_in(account_id, TimeRange::new(from, to)).await
    }

    pub(crate) async fn transactions_in(
        &self,
        account_id: Uuid,
        range: TimeRange,
    ) -> AppResult<Vec<Transaction>> {
        // Unknown accounts fail instead of listing nothing
        self.store.find_read_only(account_id).await?;

        Ok(self.store.find_transactions(account_id, range).await?)
    }
}
