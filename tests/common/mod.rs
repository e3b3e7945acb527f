//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use bank_ledger::store::{InMemoryLedgerStore, PgLedgerStore};
use bank_ledger::LedgerService;

/// In-memory service with a short lock timeout
pub fn memory_service() -> Arc<LedgerService<InMemoryLedgerStore>> {
    memory_service_with_timeout(Duration::from_millis(2000))
}

pub fn memory_service_with_timeout(lock_timeout: Duration) -> Arc<LedgerService<InMemoryLedgerStore>> {
    Arc::new(LedgerService::new(InMemoryLedgerStore::new(lock_timeout)))
}

/// Open a fresh account and return its id
pub async fn open_account(service: &LedgerService<InMemoryLedgerStore>) -> Uuid {
    service
        .open_account(None)
        .await
        .expect("Failed to open account")
        .account_id
}

/// JSON request builder
pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Collect a response body as text
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Connect to the test database. The schema from migrations/ must already be
/// applied; tests use fresh account ids so they never need truncation.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    assert!(
        bank_ledger::db::check_schema(&pool).await.expect("Schema check failed"),
        "Run migrations/0001_ledger_schema.sql before the postgres tests"
    );

    pool
}

pub async fn postgres_service(lock_timeout: Duration) -> Arc<LedgerService<PgLedgerStore>> {
    let pool = setup_test_db().await;
    Arc::new(LedgerService::new(PgLedgerStore::new(pool, lock_timeout)))
}
