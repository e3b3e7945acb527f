//! Idempotency Repository
//!
//! Postgres queries against the `operations` table. They take a connection
//! rather than the pool so callers run them inside their own transaction.

use sqlx::PgConnection;
use uuid::Uuid;

/// Check whether an operation id has been recorded
pub async fn operation_exists(conn: &mut PgConnection, operation_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (SELECT 1 FROM operations WHERE id = $1)
        "#,
    )
    .bind(operation_id)
    .fetch_one(conn)
    .await
}

/// Insert an operation id; an existing id is left untouched.
///
/// Returns whether a new row was written.
pub async fn record_operation(conn: &mut PgConnection, operation_id: Uuid) -> Result<bool, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        INSERT INTO operations (id, created_at)
        VALUES ($1, NOW())
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(operation_id)
    .execute(conn)
    .await?
    .rows_affected();

    Ok(rows == 1)
}
