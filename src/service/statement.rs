//! Statement export
//!
//! Renders an account's transactions for a range of days as CSV.

use chrono::{NaiveDate, SecondsFormat};
use uuid::Uuid;

use crate::domain::{TimeRange, Transaction};
use crate::error::{AppError, AppResult};
use crate::store::LedgerRepository;

use super::LedgerService;

/// CSV header row
pub const STATEMENT_HEADER: [&str; 4] = ["date", "operation", "amount", "balance"];

impl<S: LedgerRepository> LedgerService<S> {
    /// CSV statement for whole UTC days, both bounds inclusive, newest first
    pub async fn statement(
        &self,
        account_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> AppResult<String> {
        let range = TimeRange::from_days(from, to);
        let transactions = self.transactions_in(account_id, range).await?;

        tracing::debug!(%account_id, rows = transactions.len(), "Rendering statement");
        render_csv(&transactions)
    }
}

/// Render transactions in the given order
pub fn render_csv(transactions: &[Transaction]) -> AppResult<String> {
    let mut csv_writer = csv::Writer::from_writer(Vec::new());

    csv_writer.write_record(STATEMENT_HEADER).map_err(csv_error)?;

    for transaction in transactions {
        csv_writer
            .write_record(&[
                transaction
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                transaction.transaction_type.as_str().to_string(),
                transaction.amount.to_string(),
                transaction.resulting_balance.to_string(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = csv_writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV flush failed: {}", e)))?;

    String::from_utf8(bytes).map_err(|e| AppError::Internal(e.to_string()))
}

fn csv_error(err: csv::Error) -> AppError {
    AppError::Internal(format!("CSV write failed: {}", err))
}
