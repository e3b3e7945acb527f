//! Bank Ledger Library
//!
//! Per-account balances with idempotent, serialized deposits and withdrawals.
//! Re-exports modules for integration testing and the server binary.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod idempotency;
pub mod service;
pub mod store;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{Config, LogFormat, StorageBackend};
pub use domain::{Amount, AmountError, Balance, DomainError, TimeRange, Transaction, TransactionType};
pub use error::{AppError, AppResult, ErrorResponse};
pub use service::{AccountView, DepositCommand, LedgerService, MutationOutcome, WithdrawCommand};

/// Initialize tracing/logging
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bank_ledger=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
