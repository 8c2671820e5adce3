//! Error types for the work queue

use thiserror::Error;

/// Work queue error
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Enqueue error
    #[error("Enqueue error: {0}")]
    Enqueue(String),

    /// The queue has been closed and accepts no more jobs
    #[error("Queue closed")]
    Closed,
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
