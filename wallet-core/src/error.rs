//! Error taxonomy for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Business-rule rejections (`WalletNotFound`, `InsufficientBalance`, ...)
/// are permanent: retrying them wastes queue attempts. Infrastructure
/// failures (`Storage`, `Queue`) are transient and worth retrying.
#[derive(Error, Debug)]
pub enum Error {
    /// Wallet absent
    #[error("wallet not found: {0}")]
    WalletNotFound(Uuid),

    /// At least one side of a transfer is absent
    #[error("one or both wallets not found")]
    WalletPairNotFound,

    /// Transaction row absent
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// User already has a wallet
    #[error("user {0} already has a wallet")]
    WalletExists(Uuid),

    /// Balance below the requested amount
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance {
        /// Currently known balance
        available: Decimal,
        /// Requested debit amount
        requested: Decimal,
    },

    /// Amount must be strictly positive
    #[error("amount must be positive: {0}")]
    NonPositiveAmount(Decimal),

    /// Store unavailable, lock timeout, constraint violation
    #[error("storage error: {0}")]
    Storage(String),

    /// Enqueue or payload codec failure
    #[error("queue error: {0}")]
    Queue(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the queue should retry the job that hit this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Queue(_) | Error::Other(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_failures_are_permanent() {
        assert!(!Error::WalletNotFound(Uuid::nil()).is_retryable());
        assert!(!Error::WalletPairNotFound.is_retryable());
        assert!(!Error::InsufficientBalance {
            available: Decimal::new(100000, 2),
            requested: Decimal::new(200000, 2),
        }
        .is_retryable());
        assert!(!Error::NonPositiveAmount(Decimal::ZERO).is_retryable());
    }

    #[test]
    fn test_infrastructure_failures_are_retryable() {
        assert!(Error::Storage("connection refused".to_string()).is_retryable());
        assert!(Error::Queue("enqueue timeout".to_string()).is_retryable());
    }
}
