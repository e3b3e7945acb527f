//! Service module
//!
//! Ledger orchestration on top of the account aggregate and the stores.

pub mod commands;
pub mod ledger;
pub mod statement;

pub use commands::{DepositCommand, WithdrawCommand};
pub use ledger::{AccountView, LedgerService, MutationOutcome};
pub use statement::render_csv;
