//! Wallet ledger domain core
//!
//! Domain model and collaborator boundaries for a two-party balance-transfer
//! ledger with exactly-once accounting semantics.
//!
//! # Architecture
//!
//! - **Pessimistic locking**: wallet balances are protected by store-level
//!   exclusive row locks, not in-process mutexes
//! - **Idempotency**: every mutation carries a client-supplied key; duplicate
//!   keys short-circuit to the prior result
//! - **Exact arithmetic**: `Decimal` for money, no floating point
//!
//! # Invariants
//!
//! - A wallet balance is never negative
//! - At most one transaction row exists per idempotency key
//! - Every balance mutation commits atomically with its transaction row(s)

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod cache;
pub mod config;
pub mod error;
pub mod policy;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use types::{
    DepositPayload, IdempotencyKey, TransactionFilter, TransactionPage, TransactionRecord,
    TransactionStatus, TransactionType, TransferPayload, Wallet, WithdrawPayload,
};
