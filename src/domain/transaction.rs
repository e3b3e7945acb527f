//! Transaction records
//!
//! Immutable lines of an account's history plus the time-range filter used
//! by the read side.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    /// Column value used in the `transactions.type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// A single applied deposit or withdrawal.
///
/// `resulting_balance` snapshots the balance right after this line so
/// history reads never have to replay the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Per-account position, 1-based, tie-breaker for equal timestamps
    pub sequence: i64,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub resulting_balance: Decimal,
}

impl Transaction {
    /// Signed contribution of this line to the balance
    pub fn signed_amount(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Deposit => self.amount,
            TransactionType::Withdrawal => -self.amount,
        }
    }
}

/// Inclusive time window for transaction queries. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    /// Unbounded range
    pub fn all() -> Self {
        Self::default()
    }

    /// Day-granularity bounds converted to UTC instants.
    ///
    /// `from` starts at 00:00:00 UTC; `to` ends one nanosecond before the
    /// following midnight, so the whole `to` day is included.
    pub fn from_days(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        let from = from.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc());
        let to = to
            .and_then(|d| d.succ_opt())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc() - Duration::nanoseconds(1));
        Self { from, to }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| instant >= from) && self.to.map_or(true, |to| instant <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_transaction_type_round_trip_through_column_value() {
        for ty in [TransactionType::Deposit, TransactionType::Withdrawal] {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), ty);
        }
        assert!("WITHDRAW".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_transaction_type_serializes_upper_case() {
        let json = serde_json::to_string(&TransactionType::Withdrawal).unwrap();
        assert_eq!(json, "\"WITHDRAWAL\"");
    }

    #[test]
    fn test_signed_amount() {
        let mut tx = Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            sequence: 1,
            transaction_type: TransactionType::Deposit,
            amount: dec!(25.50),
            timestamp: at(10, 0, 0),
            resulting_balance: dec!(25.50),
        };
        assert_eq!(tx.signed_amount(), dec!(25.50));

        tx.transaction_type = TransactionType::Withdrawal;
        assert_eq!(tx.signed_amount(), dec!(-25.50));
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let range = TimeRange::new(Some(at(10, 0, 0)), Some(at(12, 0, 0)));

        assert!(range.contains(at(10, 0, 0)));
        assert!(range.contains(at(12, 0, 0)));
        assert!(!range.contains(at(9, 59, 59)));
        assert!(!range.contains(at(12, 0, 1)));
        assert!(TimeRange::all().contains(at(0, 0, 0)));
    }

    #[test]
    fn test_from_days_covers_whole_end_day() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let range = TimeRange::from_days(Some(day), Some(day));

        assert_eq!(range.from, Some(at(0, 0, 0)));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_from_days_open_bounds() {
        let range = TimeRange::from_days(None, None);
        assert_eq!(range, TimeRange::all());
    }
}
