//! API Routes
//!
//! HTTP endpoint definitions.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Transaction, TransactionType};
use crate::error::AppError;
use crate::service::{AccountView, DepositCommand, LedgerService, MutationOutcome, WithdrawCommand};
use crate::store::LedgerRepository;

type SharedService<S> = Arc<LedgerService<S>>;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    #[serde(default)]
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
}

impl From<AccountView> for BalanceResponse {
    fn from(view: AccountView) -> Self {
        Self {
            account_id: view.account_id,
            balance: view.balance,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
    pub applied: bool,
}

impl From<MutationOutcome> for DepositResponse {
    fn from(outcome: MutationOutcome) -> Self {
        Self {
            account_id: outcome.account_id,
            balance: outcome.balance,
            applied: outcome.applied,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub resulting_balance: Decimal,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            timestamp: tx.timestamp,
            resulting_balance: tx.resulting_balance,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StatementQuery {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the account API router
pub fn create_router<S: LedgerRepository>() -> Router<SharedService<S>> {
    Router::new()
        .route("/accounts", post(open_account::<S>))
        .route("/accounts/:account_id", get(get_account::<S>))
        .route("/accounts/:account_id/deposit", post(deposit::<S>))
        .route("/accounts/:account_id/withdraw", post(withdraw::<S>))
        .route("/accounts/:account_id/transactions", get(list_transactions::<S>))
        .route("/accounts/:account_id/statement", get(statement::<S>))
}

fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::InvalidRequest(rejection.body_text())
}

fn bad_path(rejection: PathRejection) -> AppError {
    AppError::InvalidRequest(rejection.body_text())
}

fn bad_query(rejection: QueryRejection) -> AppError {
    AppError::InvalidRequest(rejection.body_text())
}

// =========================================================================
// POST /accounts
// =========================================================================

/// Open an account; the body and its `accountId` are optional
async fn open_account<S: LedgerRepository>(
    State(service): State<SharedService<S>>,
    body: Bytes,
) -> Result<(StatusCode, Json<BalanceResponse>), AppError> {
    let request: OpenAccountRequest = if body.iter().all(u8::is_ascii_whitespace) {
        OpenAccountRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(e.to_string()))?
    };

    let view = service.open_account(request.account_id).await?;

    Ok((StatusCode::CREATED, Json(view.into())))
}

// =========================================================================
// GET /accounts/:account_id
// =========================================================================

async fn get_account<S: LedgerRepository>(
    State(service): State<SharedService<S>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BalanceResponse>, AppError> {
    let Path(account_id) = path.map_err(bad_path)?;
    let view = service.get_balance(account_id).await?;
    Ok(Json(view.into()))
}

// =========================================================================
// POST /accounts/:account_id/deposit
// =========================================================================

/// 201 when applied, 200 when the operation id was already applied
async fn deposit<S: LedgerRepository>(
    State(service): State<SharedService<S>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MutationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DepositResponse>), AppError> {
    let Path(account_id) = path.map_err(bad_path)?;
    let Json(request) = payload.map_err(bad_json)?;

    let outcome = service
        .deposit(DepositCommand {
            account_id,
            amount: request.amount,
            operation_id: request.operation_id,
        })
        .await?;

    let status = if outcome.applied {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(outcome.into())))
}

// =========================================================================
// POST /accounts/:account_id/withdraw
// =========================================================================

async fn withdraw<S: LedgerRepository>(
    State(service): State<SharedService<S>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MutationRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, AppError> {
    let Path(account_id) = path.map_err(bad_path)?;
    let Json(request) = payload.map_err(bad_json)?;

    let outcome = service
        .withdraw(WithdrawCommand {
            account_id,
            amount: request.amount,
            operation_id: request.operation_id,
        })
        .await?;

    Ok(Json(BalanceResponse {
        account_id: outcome.account_id,
        balance: outcome.balance,
    }))
}

// =========================================================================
// GET /accounts/:account_id/transactions
// =========================================================================

async fn list_transactions<S: LedgerRepository>(
    State(service): State<SharedService<S>>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<TransactionsQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let Path(account_id) = path.map_err(bad_path)?;
    let Query(query) = query.map_err(bad_query)?;

    let transactions = service
        .list_transactions(account_id, query.from, query.to)
        .await?;

    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

// =========================================================================
// GET /accounts/:account_id/statement
// =========================================================================

async fn statement<S: LedgerRepository>(
    State(service): State<SharedService<S>>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<StatementQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(account_id) = path.map_err(bad_path)?;
    let Query(query) = query.map_err(bad_query)?;

    let csv = service.statement(account_id, query.from, query.to).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"statement-{}.csv\"", account_id),
            ),
        ],
        csv,
    ))
}
