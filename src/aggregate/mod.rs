//! Aggregate module
//!
//! Aggregate roots that own the ledger's business invariants.

pub mod account;

pub use account::Account;
