//! Core types for the wallet ledger
//!
//! All money amounts are exact decimals with two fractional digits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Client-supplied idempotency key, globally unique across all transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create a new idempotency key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derived key for the credit leg of a transfer
    pub fn credit_leg(&self) -> IdempotencyKey {
        Self(format!("{}_CREDIT", self.0))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user's monetary wallet. One wallet per user, mutated only by the
/// transaction processor, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet identifier
    pub id: Uuid,

    /// Owning user (unique per wallet)
    pub user_id: Uuid,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Single-wallet credit from outside the system
    Deposit,
    /// Single-wallet debit to outside the system
    Withdrawal,
    /// Source leg of a transfer
    Debit,
    /// Destination leg of a transfer
    Credit,
}

impl TransactionType {
    /// Wire/store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Debit => "DEBIT",
            TransactionType::Credit => "CREDIT",
        }
    }

    /// Parse from the store representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            "DEBIT" => Some(TransactionType::Debit),
            "CREDIT" => Some(TransactionType::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction status. Rows are only ever inserted already resolved;
/// `Pending` is the schema default and is never assigned by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Reserved default, never explicitly assigned
    Pending,
    /// Applied and committed (terminal)
    Completed,
    /// Rolled back and recorded (terminal)
    Failed,
}

impl TransactionStatus {
    /// Wire/store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    /// Parse from the store representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable ledger transaction row. Created exclusively by the
/// transaction processor; never updated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Row identifier
    pub id: Uuid,

    /// Owning wallet
    pub wallet_id: Uuid,

    /// Transaction type
    pub kind: TransactionType,

    /// Amount, strictly positive
    pub amount: Decimal,

    /// Client-supplied idempotency key (unique per logical leg)
    pub idempotency_key: IdempotencyKey,

    /// Destination wallet, set on the debit leg of a transfer
    pub to_wallet_id: Option<Uuid>,

    /// Resolution status
    pub status: TransactionStatus,

    /// Opaque metadata: job correlation, error text
    pub metadata: HashMap<String, String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build a COMPLETED row carrying the originating job reference.
    pub fn completed(
        wallet_id: Uuid,
        kind: TransactionType,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
        job_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        let mut metadata = HashMap::new();
        metadata.insert("job_id".to_string(), job_id.to_string());

        Self {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            amount,
            idempotency_key,
            to_wallet_id: None,
            status: TransactionStatus::Completed,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a FAILED row carrying the error message and job reference.
    pub fn failed(
        wallet_id: Uuid,
        kind: TransactionType,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
        error: &str,
        job_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        let mut metadata = HashMap::new();
        metadata.insert("job_id".to_string(), job_id.to_string());
        metadata.insert("error".to_string(), error.to_string());

        Self {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            amount,
            idempotency_key,
            to_wallet_id: None,
            status: TransactionStatus::Failed,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the destination wallet (debit legs of a transfer)
    pub fn with_to_wallet(mut self, to_wallet_id: Uuid) -> Self {
        self.to_wallet_id = Some(to_wallet_id);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Filter and pagination for transaction history listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// 1-based page number
    pub page: u32,

    /// Page size
    pub limit: u32,

    /// Restrict to one transaction type
    pub kind: Option<TransactionType>,

    /// Restrict to one status
    pub status: Option<TransactionStatus>,

    /// Inclusive lower bound on `created_at`
    pub start_date: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `created_at`
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            kind: None,
            status: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl TransactionFilter {
    /// Offset implied by page and limit
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// One page of transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    /// Rows on this page, newest first
    pub transactions: Vec<TransactionRecord>,

    /// 1-based page number
    pub page: u32,

    /// Page size
    pub limit: u32,

    /// Total matching rows
    pub total: u64,

    /// Total page count
    pub total_pages: u32,
}

impl TransactionPage {
    /// Assemble a page, deriving the page count.
    pub fn new(transactions: Vec<TransactionRecord>, filter: &TransactionFilter, total: u64) -> Self {
        let total_pages = if filter.limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(filter.limit)) as u32
        };

        Self {
            transactions,
            page: filter.page,
            limit: filter.limit,
            total,
            total_pages,
        }
    }
}

/// Deposit job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositPayload {
    /// Target wallet
    pub wallet_id: Uuid,
    /// Amount to credit
    pub amount: Decimal,
    /// Idempotency key
    pub transaction_id: IdempotencyKey,
}

/// Withdrawal job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawPayload {
    /// Source wallet
    pub wallet_id: Uuid,
    /// Amount to debit
    pub amount: Decimal,
    /// Idempotency key
    pub transaction_id: IdempotencyKey,
}

/// Transfer job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPayload {
    /// Source wallet
    pub from_wallet_id: Uuid,
    /// Destination wallet
    pub to_wallet_id: Uuid,
    /// Amount moved from source to destination
    pub amount: Decimal,
    /// Idempotency key for the debit leg
    pub transaction_id: IdempotencyKey,
}
