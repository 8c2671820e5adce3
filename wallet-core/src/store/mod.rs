//! Ledger store boundary
//!
//! The store is the single source of truth and the only writer of wallet
//! balances. Its row-level exclusive locks are the sole concurrency-control
//! mechanism: workers may be separate processes, so no in-process mutex is
//! sufficient.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgLedgerStore;

use crate::error::Result;
use crate::types::{
    IdempotencyKey, TransactionFilter, TransactionPage, TransactionRecord, Wallet,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Relational persistence with ACID transactions and row-level exclusive
/// locks.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Transaction handle type
    type Tx: LedgerTransaction;

    /// Begin a store-level transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Look up a wallet by owning user (unlocked read).
    async fn wallet_by_user(&self, user_id: Uuid) -> Result<Option<Wallet>>;

    /// Look up a wallet by id (unlocked read).
    async fn wallet_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>>;

    /// Look up a transaction row by idempotency key (unlocked read, used by
    /// the facade's best-effort pre-check).
    async fn transaction_by_key(&self, key: &IdempotencyKey) -> Result<Option<TransactionRecord>>;

    /// Look up a transaction row by id, scoped to one wallet.
    async fn transaction_by_id(&self, wallet_id: Uuid, id: Uuid)
        -> Result<Option<TransactionRecord>>;

    /// Paginated, filtered transaction history for one wallet, newest first.
    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage>;

    /// Create a wallet with zero balance. Fails with `WalletExists` if the
    /// user already has one.
    async fn create_wallet(&self, user_id: Uuid) -> Result<Wallet>;

    /// Insert a transaction row outside any transaction. Used for the
    /// best-effort FAILED record after a rollback.
    async fn insert_transaction(&self, record: TransactionRecord) -> Result<TransactionRecord>;
}

/// One open store-level transaction. Row locks taken through this handle are
/// held until `commit` or `rollback`; dropping an uncommitted transaction
/// rolls back.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Authoritative idempotency lookup inside the transaction.
    async fn transaction_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<TransactionRecord>>;

    /// Acquire an exclusive row lock on one wallet and return it. Blocks
    /// until any conflicting transaction commits or rolls back.
    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>>;

    /// Acquire exclusive row locks on two wallets in the order given.
    /// Callers must pass ids in the policy's lock order. Returns the rows
    /// that exist; absent wallets are simply missing from the result.
    async fn lock_wallet_pair(&mut self, first: Uuid, second: Uuid) -> Result<Vec<Wallet>>;

    /// Stage a balance update for a locked wallet.
    async fn update_balance(&mut self, wallet_id: Uuid, balance: Decimal) -> Result<()>;

    /// Stage a transaction row insert. Enforces the unique idempotency-key
    /// constraint.
    async fn insert_transaction(&mut self, record: TransactionRecord) -> Result<TransactionRecord>;

    /// Commit: all staged writes become visible atomically, locks release.
    async fn commit(self) -> Result<()>;

    /// Roll back: staged writes are discarded, locks release.
    async fn rollback(self) -> Result<()>;
}
