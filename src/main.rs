//! Bank Ledger - account balance service
//!
//! Serves deposits, withdrawals, balances, transaction history and CSV
//! statements over HTTP, backed by PostgreSQL or an in-process store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;

use bank_ledger::store::{InMemoryLedgerStore, PgLedgerStore};
use bank_ledger::{api, db, init_tracing, Config, LedgerService, StorageBackend};

/// CORS policy: an explicit origin, permissive in development, none in production
fn cors_layer(config: &Config) -> anyhow::Result<Option<CorsLayer>> {
    match &config.cors_allow_origin {
        Some(origin) => {
            let origin: HeaderValue = origin
                .parse()
                .context("CORS_ALLOW_ORIGIN is not a valid header value")?;
            Ok(Some(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers([header::CONTENT_TYPE]),
            ))
        }
        None if config.is_production() => Ok(None),
        None => Ok(Some(CorsLayer::permissive())),
    }
}

async fn serve(app: Router, config: &Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let app = match cors_layer(config)? {
        Some(cors) => app.layer(cors),
        None => app,
    };

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    tracing::info!(
        backend = ?config.storage_backend,
        environment = %config.environment,
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        "Starting bank ledger server"
    );

    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store; balances are lost on exit");
            let store = InMemoryLedgerStore::new(config.lock_timeout);
            let service = Arc::new(LedgerService::new(store));

            serve(api::build_router(service), &config).await?;
        }
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;

            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await?;

            db::verify_connection(&pool).await?;
            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            let store = PgLedgerStore::new(pool.clone(), config.lock_timeout);
            let service = Arc::new(LedgerService::new(store));

            serve(api::build_router(service), &config).await?;

            pool.close().await;
            tracing::info!("Database connections closed. Goodbye!");
        }
    }

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
