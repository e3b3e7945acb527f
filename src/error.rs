//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found: {account_id}")]
    AccountNotFound {
        account_id: Uuid,
        operation_id: Option<Uuid>,
    },

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(Uuid),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Attach the operation id of the failed mutation, where the error carries one
    pub fn with_operation(self, operation_id: Uuid) -> Self {
        match self {
            AppError::AccountNotFound { account_id, .. } => AppError::AccountNotFound {
                account_id,
                operation_id: Some(operation_id),
            },
            other => other,
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Storage(e) if e.is_transient())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(account_id) => AppError::AccountNotFound {
                account_id,
                operation_id: None,
            },
            StoreError::AccountAlreadyExists(account_id) => {
                AppError::AccountAlreadyExists(account_id)
            }
            other => AppError::Storage(other),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Uuid>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut operation_id = None;

        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::AccountNotFound {
                account_id,
                operation_id: op,
            } => {
                operation_id = *op;
                (StatusCode::NOT_FOUND, "account_not_found", Some(account_id.to_string()))
            }

            // 409 Conflict
            AppError::AccountAlreadyExists(id) => {
                (StatusCode::CONFLICT, "account_already_exists", Some(id.to_string()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::InsufficientFunds { .. } => (
                    StatusCode::CONFLICT,
                    "insufficient_funds",
                    Some(domain_err.to_string()),
                ),
            },

            // 503 / 500
            AppError::Storage(StoreError::LockTimeout { account_id, waited_ms }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "lock_timeout",
                Some(format!("account {} busy after {}ms", account_id, waited_ms)),
            ),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
            operation_id,
        };

        (status, Json(body)).into_response()
    }
}
