//! Account Aggregate
//!
//! Account is the core aggregate for managing balances.
//! It enforces the positive-amount and non-negative-balance rules and records
//! every applied change as a `Transaction`.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Amount, AmountError, Balance, DomainError, Transaction, TransactionType};

/// Account Aggregate
///
/// Rehydrated for mutation with its balance, version and last transaction
/// time only. `transactions()` holds the lines appended since loading, which
/// the store appends on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Unique account ID
    id: Uuid,

    /// Current balance
    balance: Balance,

    /// Number of transactions ever applied
    version: i64,

    /// Timestamp of the latest transaction, if any
    last_transaction_at: Option<DateTime<Utc>>,

    /// Transactions appended since rehydration
    pending: Vec<Transaction>,
}

impl Account {
    /// Open a new account with zero balance and empty history
    pub fn open(id: Uuid) -> Self {
        Self {
            id,
            balance: Balance::zero(),
            version: 0,
            last_transaction_at: None,
            pending: Vec::new(),
        }
    }

    /// Rebuild an account from persisted state.
    ///
    /// Fails if the stored balance is negative.
    pub fn rehydrate(
        id: Uuid,
        balance: Decimal,
        version: i64,
        last_transaction_at: Option<DateTime<Utc>>,
    ) -> Result<Self, AmountError> {
        Ok(Self {
            id,
            balance: Balance::new(balance)?,
            version,
            last_transaction_at,
            pending: Vec::new(),
        })
    }

    // =========================================================================
    // deposit
    // =========================================================================

    /// Deposit a positive amount and append a DEPOSIT transaction.
    pub fn deposit(&mut self, amount: Decimal) -> Result<&Transaction, DomainError> {
        self.deposit_at(amount, Utc::now())
    }

    /// Deposit using an explicit clock reading
    pub fn deposit_at(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<&Transaction, DomainError> {
        let amount = Amount::new(amount)?;
        let balance = self.balance.credit(&amount)?;

        Ok(self.append(TransactionType::Deposit, amount, balance, now))
    }

    // =========================================================================
    // withdraw
    // =========================================================================

    /// Withdraw a positive amount if the balance covers it.
    ///
    /// On `InsufficientFunds` balance and history are left untouched.
    pub fn withdraw(&mut self, amount: Decimal) -> Result<&Transaction, DomainError> {
        self.withdraw_at(amount, Utc::now())
    }

    /// Withdraw using an explicit clock reading
    pub fn withdraw_at(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<&Transaction, DomainError> {
        let amount = Amount::new(amount)?;

        if !self.balance.is_sufficient_for(&amount) {
            return Err(DomainError::insufficient_funds(
                self.balance.value(),
                amount.value(),
            ));
        }
        let balance = self.balance.debit(&amount)?;

        Ok(self.append(TransactionType::Withdrawal, amount, balance, now))
    }

    fn append(
        &mut self,
        transaction_type: TransactionType,
        amount: Amount,
        balance: Balance,
        now: DateTime<Utc>,
    ) -> &Transaction {
        let timestamp = self.next_timestamp(now);

        self.balance = balance;
        self.version += 1;
        self.last_transaction_at = Some(timestamp);
        self.pending.push(Transaction {
            id: Uuid::new_v4(),
            account_id: self.id,
            sequence: self.version,
            transaction_type,
            amount: amount.value(),
            timestamp,
            resulting_balance: balance.value(),
        });

        &self.pending[self.pending.len() - 1]
    }

    /// Microsecond-truncated wall clock, forced strictly past the previous
    /// transaction so history order never depends on clock skew.
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.trunc_subsecs(6);
        match self.last_transaction_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn last_transaction_at(&self) -> Option<DateTime<Utc>> {
        self.last_transaction_at
    }

    /// Transactions appended since this account was opened or loaded
    pub fn transactions(&self) -> &[Transaction] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_account_open() {
        let id = Uuid::new_v4();
        let account = Account::open(id);

        assert_eq!(account.id(), id);
        assert_eq!(account.balance().value(), Decimal::ZERO);
        assert_eq!(account.version(), 0);
        assert!(account.transactions().is_empty());
    }

    #[test]
    fn test_account_deposit() {
        let mut account = Account::open(Uuid::new_v4());

        let tx = account.deposit(dec!(100)).unwrap().clone();

        assert_eq!(tx.transaction_type, TransactionType::Deposit);
        assert_eq!(tx.amount, dec!(100));
        assert_eq!(tx.resulting_balance, dec!(100));
        assert_eq!(tx.sequence, 1);
        assert_eq!(account.balance().value(), dec!(100));
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn test_account_withdraw() {
        let mut account = Account::open(Uuid::new_v4());
        account.deposit(dec!(100)).unwrap();

        let tx = account.withdraw(dec!(30)).unwrap().clone();

        assert_eq!(tx.transaction_type, TransactionType::Withdrawal);
        assert_eq!(tx.resulting_balance, dec!(70));
        assert_eq!(account.balance().value(), dec!(70));
        assert_eq!(account.transactions().len(), 2);
    }

    #[test]
    fn test_withdraw_entire_balance() {
        let mut account = Account::open(Uuid::new_v4());
        account.deposit(dec!(42.42)).unwrap();

        account.withdraw(dec!(42.42)).unwrap();
        assert_eq!(account.balance().value(), Decimal::ZERO);
    }

    #[test]
    fn test_account_insufficient_funds_leaves_state_untouched() {
        let mut account = Account::open(Uuid::new_v4());
        account.deposit(dec!(50)).unwrap();
        let before = account.clone();

        let result = account.withdraw(dec!(100)).map(|_| ());

        assert_eq!(
            result.unwrap_err(),
            DomainError::InsufficientFunds {
                balance: dec!(50),
                requested: dec!(100),
            }
        );
        assert_eq!(account, before);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut account = Account::open(Uuid::new_v4());

        for amount in [Decimal::ZERO, dec!(-5)] {
            assert!(matches!(account.deposit(amount), Err(DomainError::InvalidAmount(_))));
            assert!(matches!(account.withdraw(amount), Err(DomainError::InvalidAmount(_))));
        }
        assert!(account.transactions().is_empty());
    }

    #[test]
    fn test_deposit_past_balance_limit_rejected() {
        let mut account =
            Account::rehydrate(Uuid::new_v4(), dec!(999999999999999), 3, None).unwrap();

        let err = account.deposit(dec!(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(ref msg) if msg.contains("balance")));
        assert_eq!(account.balance().value(), dec!(999999999999999));
        assert!(account.transactions().is_empty());
    }

    #[test]
    fn test_ten_cent_deposits_sum_exactly() {
        let mut account = Account::open(Uuid::new_v4());
        for _ in 0..10 {
            account.deposit(dec!(0.10)).unwrap();
        }
        assert_eq!(account.balance().value(), dec!(1.00));
    }

    #[test]
    fn test_timestamps_strictly_increase_within_same_tick() {
        let mut account = Account::open(Uuid::new_v4());

        account.deposit_at(dec!(1), noon()).unwrap();
        account.deposit_at(dec!(1), noon()).unwrap();
        account.withdraw_at(dec!(1), noon() - Duration::seconds(5)).unwrap();

        let stamps: Vec<_> = account.transactions().iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps[0], noon());
        assert!(stamps[0] < stamps[1]);
        assert!(stamps[1] < stamps[2]);
    }

    #[test]
    fn test_rehydrate_continues_sequence_and_clock() {
        let last = noon();
        let mut account = Account::rehydrate(Uuid::new_v4(), dec!(10), 7, Some(last)).unwrap();

        let tx = account.deposit_at(dec!(5), last).unwrap();

        assert_eq!(tx.sequence, 8);
        assert!(tx.timestamp > last);
        assert_eq!(tx.resulting_balance, dec!(15));
    }

    #[test]
    fn test_rehydrate_rejects_negative_balance() {
        assert!(Account::rehydrate(Uuid::new_v4(), dec!(-1), 0, None).is_err());
    }

    proptest! {
        #[test]
        fn prop_balance_matches_signed_history(ops in proptest::collection::vec((any::<bool>(), 1i64..100_000), 0..40)) {
            let mut account = Account::open(Uuid::new_v4());

            for (is_deposit, cents) in ops {
                let amount = Decimal::new(cents, 2);
                if is_deposit {
                    account.deposit(amount).unwrap();
                } else {
                    let before = account.balance();
                    match account.withdraw(amount).map(|_| ()) {
                        Ok(_) => {}
                        Err(DomainError::InsufficientFunds { .. }) => {
                            prop_assert_eq!(account.balance(), before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {:?}", e),
                    }
                }
                prop_assert!(account.balance().value() >= Decimal::ZERO);
            }

            let sum: Decimal = account.transactions().iter().map(|t| t.signed_amount()).sum();
            prop_assert_eq!(sum, account.balance().value());
            if let Some(last) = account.transactions().last() {
                prop_assert_eq!(last.resulting_balance, account.balance().value());
            }
        }
    }
}
