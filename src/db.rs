//! Database module
//!
//! Database connection and schema utilities.

use sqlx::PgPool;

/// Tables the Postgres ledger store reads and writes
pub const REQUIRED_TABLES: [&str; 3] = ["accounts", "transactions", "operations"];

/// Verify database connectivity.
/// Note: the schema itself comes from the raw SQL files in migrations/
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    tracing::info!("Ledger schema verified: {}", REQUIRED_TABLES.join(", "));
    Ok(true)
}
