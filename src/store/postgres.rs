//! Postgres Ledger Store
//!
//! Accounts, transactions and operation markers in PostgreSQL.
//! The exclusive hold is a `SELECT ... FOR UPDATE` row lock taken inside the
//! unit of work's database transaction and bounded by `lock_timeout`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use crate::aggregate::Account;
use crate::domain::{TimeRange, Transaction, TransactionType};
use crate::idempotency::{self, IdempotencyStore};

use super::{AccountStore, LedgerRepository, StoreError, UnitOfWork};

/// SQLSTATE raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";

type AccountRow = (Uuid, Decimal, i64, Option<DateTime<Utc>>);
type TransactionRow = (Uuid, Uuid, i64, String, Decimal, DateTime<Utc>, Decimal);

/// Postgres-backed ledger repository
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Create a new store with a database pool
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Unit of work backed by one database transaction
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    lock_timeout: Duration,
}

#[async_trait]
impl LedgerRepository for PgLedgerStore {
    type Work = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Scoped to this transaction only
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(PgUnitOfWork {
            tx,
            lock_timeout: self.lock_timeout,
        })
    }

    async fn find_read_only(&self, account_id: Uuid) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, balance, version, last_transaction_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row)
            .transpose()?
            .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn find_transactions(
        &self,
        account_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<Transaction>, StoreError> {
        // Explicit casts so NULL bounds still type-check
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, sequence, type, amount, timestamp, resulting_balance
            FROM transactions
            WHERE account_id = $1
              AND ($2::timestamptz IS NULL OR timestamp >= $2::timestamptz)
              AND ($3::timestamptz IS NULL OR timestamp <= $3::timestamptz)
            ORDER BY timestamp DESC, sequence DESC
            "#,
        )
        .bind(account_id)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    async fn open_account(&self, account: &Account) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            INSERT INTO accounts (id, balance, version, last_transaction_at, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account.id())
        .bind(account.balance().value())
        .bind(account.version())
        .bind(account.last_transaction_at())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::AccountAlreadyExists(account.id()));
        }

        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgUnitOfWork {
    async fn acquire_exclusive(&mut self, account_id: Uuid) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, balance, version, last_transaction_at
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, account_id, self.lock_timeout))?;

        row.map(account_from_row)
            .transpose()?
            .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, version = $3, last_transaction_at = $4
            WHERE id = $1
            "#,
        )
        .bind(account.id())
        .bind(account.balance().value())
        .bind(account.version())
        .bind(account.last_transaction_at())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::AccountNotFound(account.id()));
        }

        for transaction in account.transactions() {
            insert_transaction(&mut self.tx, transaction).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for PgUnitOfWork {
    async fn exists(&mut self, operation_id: Uuid) -> Result<bool, StoreError> {
        Ok(idempotency::operation_exists(&mut self.tx, operation_id).await?)
    }

    async fn record(&mut self, operation_id: Uuid) -> Result<(), StoreError> {
        // Waits on a concurrent uncommitted insert of the same id
        if !idempotency::record_operation(&mut self.tx, operation_id).await? {
            return Err(StoreError::DuplicateOperation(operation_id));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Append-only: a transaction id that is already stored is skipped
async fn insert_transaction(
    conn: &mut PgConnection,
    transaction: &Transaction,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO transactions (id, account_id, sequence, type, amount, timestamp, resulting_balance)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.account_id)
    .bind(transaction.sequence)
    .bind(transaction.transaction_type.as_str())
    .bind(transaction.amount)
    .bind(transaction.timestamp)
    .bind(transaction.resulting_balance)
    .execute(conn)
    .await?;

    Ok(())
}

fn account_from_row(
    (id, balance, version, last_transaction_at): AccountRow,
) -> Result<Account, StoreError> {
    Account::rehydrate(id, balance, version, last_transaction_at)
        .map_err(|e| StoreError::InvalidState(format!("account {}: {}", id, e)))
}

fn transaction_from_row(
    (id, account_id, sequence, kind, amount, timestamp, resulting_balance): TransactionRow,
) -> Result<Transaction, StoreError> {
    let transaction_type: TransactionType = kind.parse().map_err(StoreError::InvalidState)?;

    Ok(Transaction {
        id,
        account_id,
        sequence,
        transaction_type,
        amount,
        timestamp,
        resulting_balance,
    })
}

fn map_lock_error(err: sqlx::Error, account_id: Uuid, lock_timeout: Duration) -> StoreError {
    let timed_out = matches!(
        &err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
    );

    if timed_out {
        tracing::warn!(%account_id, "Lock timeout waiting for account row");
        StoreError::LockTimeout {
            account_id,
            waited_ms: lock_timeout.as_millis() as u64,
        }
    } else {
        StoreError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_from_row() {
        let now = Utc::now();
        let row: TransactionRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            3,
            "WITHDRAWAL".to_string(),
            dec!(30.00),
            now,
            dec!(70.00),
        );

        let tx = transaction_from_row(row).unwrap();
        assert_eq!(tx.transaction_type, TransactionType::Withdrawal);
        assert_eq!(tx.sequence, 3);
        assert_eq!(tx.resulting_balance, dec!(70.00));
    }

    #[test]
    fn test_transaction_from_row_rejects_unknown_type() {
        let row: TransactionRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            "TRANSFER".to_string(),
            dec!(1),
            Utc::now(),
            dec!(1),
        );

        assert!(matches!(transaction_from_row(row), Err(StoreError::InvalidState(_))));
    }

    #[test]
    fn test_account_from_row_rejects_negative_balance() {
        let row: AccountRow = (Uuid::new_v4(), dec!(-5), 1, None);
        assert!(matches!(account_from_row(row), Err(StoreError::InvalidState(_))));
    }

    #[test]
    fn test_non_lock_errors_pass_through() {
        let err = map_lock_error(sqlx::Error::RowNotFound, Uuid::new_v4(), Duration::from_millis(10));
        assert!(matches!(err, StoreError::Database(_)));
    }
}
