//! Asynchronous work queue with at-least-once delivery
//!
//! Provides job processing with:
//! - Typed job kinds with opaque JSON payloads
//! - Bounded-concurrency consumer with per-kind handlers
//! - Retry with exponential backoff and jitter for transient failures
//! - Dead letter register with manual reprocessing
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod consumer;
pub mod dlq;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod retry;

pub use consumer::{ConsumerConfig, JobError, JobHandler, QueueConsumer};
pub use dlq::{DeadLetterEntry, DeadLetters};
pub use error::{Error, Result};
pub use job::{Job, JobKind, JobRef};
pub use queue::{MemoryQueue, WorkQueue};
pub use retry::RetryConfig;
