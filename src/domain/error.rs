//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use super::AmountError;

/// Business rule violations raised by the account aggregate.
///
/// These are terminal for the current call and never retried by the ledger.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative, too precise or too large
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Withdrawal exceeds the current balance
    #[error("Insufficient funds: balance={balance}, requested={requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(balance: Decimal, requested: Decimal) -> Self {
        Self::InsufficientFunds { balance, requested }
    }

    /// Check if this is a client error (caller's fault, not a rule conflict)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidAmount(_))
    }
}

impl From<AmountError> for DomainError {
    fn from(err: AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_error() {
        let err = DomainError::insufficient_funds(Decimal::new(50, 0), Decimal::new(100, 0));

        assert!(!err.is_client_error());
        let message = err.to_string();
        assert!(message.contains("balance=50"));
        assert!(message.contains("requested=100"));
    }

    #[test]
    fn test_amount_error_becomes_invalid_amount() {
        let err: DomainError = AmountError::NotPositive(Decimal::ZERO).into();

        assert!(err.is_client_error());
        assert!(matches!(err, DomainError::InvalidAmount(ref msg) if msg.contains("positive")));
    }
}
