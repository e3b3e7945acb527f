//! Command definitions
//!
//! Commands represent intentions to change an account balance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

// =========================================================================
// DepositCommand
// =========================================================================

/// Command to credit an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositCommand {
    pub account_id: Uuid,
    /// Amount to deposit; validated by the aggregate
    pub amount: Option<Decimal>,
    /// Caller-supplied retry key
    pub operation_id: Option<Uuid>,
}

impl DepositCommand {
    pub fn new(account_id: Uuid, amount: Decimal, operation_id: Uuid) -> Self {
        Self {
            account_id,
            amount: Some(amount),
            operation_id: Some(operation_id),
        }
    }
}

// =========================================================================
// WithdrawCommand
// =========================================================================

/// Command to debit an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawCommand {
    pub account_id: Uuid,
    pub amount: Option<Decimal>,
    pub operation_id: Option<Uuid>,
}

impl WithdrawCommand {
    pub fn new(account_id: Uuid, amount: Decimal, operation_id: Uuid) -> Self {
        Self {
            account_id,
            amount: Some(amount),
            operation_id: Some(operation_id),
        }
    }
}

/// Structurally checked mutation input
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValidMutation {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub operation_id: Uuid,
}

impl ValidMutation {
    /// Reject missing or nil identifiers and a missing amount.
    ///
    /// Runs before any lock is taken. Amount value rules belong to the aggregate.
    pub(crate) fn check(
        account_id: Uuid,
        amount: Option<Decimal>,
        operation_id: Option<Uuid>,
    ) -> AppResult<Self> {
        if account_id.is_nil() {
            return Err(AppError::InvalidRequest("accountId is required".to_string()));
        }

        let operation_id = match operation_id {
            Some(id) if !id.is_nil() => id,
            _ => return Err(AppError::InvalidRequest("operationId is required".to_string())),
        };

        let amount =
            amount.ok_or_else(|| AppError::InvalidRequest("amount is required".to_string()))?;

        Ok(Self {
            account_id,
            amount,
            operation_id,
        })
    }
}

impl TryFrom<DepositCommand> for ValidMutation {
    type Error = AppError;

    fn try_from(command: DepositCommand) -> AppResult<Self> {
        Self::check(command.account_id, command.amount, command.operation_id)
    }
}

impl TryFrom<WithdrawCommand> for ValidMutation {
    type Error = AppError;

    fn try_from(command: WithdrawCommand) -> AppResult<Self> {
        Self::check(command.account_id, command.amount, command.operation_id)
    }
}
