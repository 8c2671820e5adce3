//! Wallet engine
//!
//! Wires the synchronous facade, the queue, and the transaction processor
//! into one service:
//!
//! - [`WalletLedger`] validates requests, serves cached reads, and enqueues
//!   mutations
//! - [`TransactionProcessor`] consumes jobs and applies them under store-level
//!   row locks, exactly once per idempotency key
//!
//! The split matches the delivery contract: the queue is at-least-once, so
//! every authoritative decision lives in the processor's store transaction,
//! never in the facade.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod facade;
pub mod metrics;
pub mod processor;

pub use facade::{Submission, WalletLedger};
pub use processor::TransactionProcessor;
