//! In-memory ledger store
//!
//! Faithful to the relational contract: per-wallet row locks are real async
//! mutexes held by the open transaction, staged writes become visible
//! atomically at commit, and the unique idempotency-key constraint is
//! enforced the way a unique index would be (violation surfaces when the
//! competing transaction commits).

use crate::error::{Error, Result};
use crate::store::{LedgerStore, LedgerTransaction};
use crate::types::{
    IdempotencyKey, TransactionFilter, TransactionPage, TransactionRecord, Wallet,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    wallets: RwLock<HashMap<Uuid, Wallet>>,
    user_index: RwLock<HashMap<Uuid, Uuid>>,
    transactions: RwLock<Vec<TransactionRecord>>,
    row_locks: Mutex<HashMap<Uuid, Arc<RowLock<()>>>>,
}

impl Inner {
    fn transaction_by_key(&self, key: &IdempotencyKey) -> Option<TransactionRecord> {
        self.transactions
            .read()
            .iter()
            .find(|t| &t.idempotency_key == key)
            .cloned()
    }

    fn key_exists(&self, key: &IdempotencyKey) -> bool {
        self.transactions
            .read()
            .iter()
            .any(|t| &t.idempotency_key == key)
    }

    fn row_lock(&self, wallet_id: Uuid) -> Arc<RowLock<()>> {
        self.row_locks
            .lock()
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }
}

/// In-memory store used by tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: overwrite a wallet balance directly, bypassing the ledger.
    pub fn set_balance_unchecked(&self, wallet_id: Uuid, balance: Decimal) {
        if let Some(wallet) = self.inner.wallets.write().get_mut(&wallet_id) {
            wallet.balance = balance;
            wallet.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(MemoryTransaction {
            inner: self.inner.clone(),
            guards: Vec::new(),
            staged_balances: HashMap::new(),
            staged_records: Vec::new(),
        })
    }

    async fn wallet_by_user(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let wallet_id = match self.inner.user_index.read().get(&user_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.inner.wallets.read().get(&wallet_id).cloned())
    }

    async fn wallet_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.inner.wallets.read().get(&wallet_id).cloned())
    }

    async fn transaction_by_key(&self, key: &IdempotencyKey) -> Result<Option<TransactionRecord>> {
        Ok(self.inner.transaction_by_key(key))
    }

    async fn transaction_by_id(
        &self,
        wallet_id: Uuid,
        id: Uuid,
    ) -> Result<Option<TransactionRecord>> {
        Ok(self
            .inner
            .transactions
            .read()
            .iter()
            .find(|t| t.id == id && t.wallet_id == wallet_id)
            .cloned())
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage> {
        let mut matching: Vec<TransactionRecord> = self
            .inner
            .transactions
            .read()
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .filter(|t| filter.kind.map_or(true, |k| t.kind == k))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.start_date.map_or(true, |d| t.created_at >= d))
            .filter(|t| filter.end_date.map_or(true, |d| t.created_at <= d))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let offset = filter.offset() as usize;
        let page: Vec<TransactionRecord> = matching
            .into_iter()
            .skip(offset)
            .take(filter.limit as usize)
            .collect();

        Ok(TransactionPage::new(page, filter, total))
    }

    async fn create_wallet(&self, user_id: Uuid) -> Result<Wallet> {
        let mut user_index = self.inner.user_index.write();
        if user_index.contains_key(&user_id) {
            return Err(Error::WalletExists(user_id));
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };

        user_index.insert(user_id, wallet.id);
        self.inner.wallets.write().insert(wallet.id, wallet.clone());

        Ok(wallet)
    }

    async fn insert_transaction(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let mut transactions = self.inner.transactions.write();
        if transactions
            .iter()
            .any(|t| t.idempotency_key == record.idempotency_key)
        {
            return Err(Error::Storage(format!(
                "duplicate idempotency key: {}",
                record.idempotency_key
            )));
        }
        transactions.push(record.clone());
        Ok(record)
    }
}

/// Open transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    // Held row locks; released when the transaction is dropped.
    guards: Vec<OwnedMutexGuard<()>>,
    staged_balances: HashMap<Uuid, Decimal>,
    staged_records: Vec<TransactionRecord>,
}

impl MemoryTransaction {
    fn read_wallet(&self, wallet_id: Uuid) -> Option<Wallet> {
        let mut wallet = self.inner.wallets.read().get(&wallet_id).cloned()?;
        if let Some(balance) = self.staged_balances.get(&wallet_id) {
            wallet.balance = *balance;
        }
        Some(wallet)
    }

    async fn acquire(&mut self, wallet_id: Uuid) {
        let lock = self.inner.row_lock(wallet_id);
        let guard = lock.lock_owned().await;
        self.guards.push(guard);
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn transaction_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<TransactionRecord>> {
        if let Some(staged) = self
            .staged_records
            .iter()
            .find(|t| &t.idempotency_key == key)
        {
            return Ok(Some(staged.clone()));
        }
        Ok(self.inner.transaction_by_key(key))
    }

    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        self.acquire(wallet_id).await;
        Ok(self.read_wallet(wallet_id))
    }

    async fn lock_wallet_pair(&mut self, first: Uuid, second: Uuid) -> Result<Vec<Wallet>> {
        self.acquire(first).await;
        if second != first {
            self.acquire(second).await;
        }

        let mut wallets = Vec::new();
        if let Some(w) = self.read_wallet(first) {
            wallets.push(w);
        }
        if second != first {
            if let Some(w) = self.read_wallet(second) {
                wallets.push(w);
            }
        }
        Ok(wallets)
    }

    async fn update_balance(&mut self, wallet_id: Uuid, balance: Decimal) -> Result<()> {
        if balance < Decimal::ZERO {
            // Mirrors the table constraint.
            return Err(Error::Storage(format!(
                "balance constraint violated for wallet {}: {}",
                wallet_id, balance
            )));
        }
        self.staged_balances.insert(wallet_id, balance);
        Ok(())
    }

    async fn insert_transaction(&mut self, record: TransactionRecord) -> Result<TransactionRecord> {
        let staged_dup = self
            .staged_records
            .iter()
            .any(|t| t.idempotency_key == record.idempotency_key);
        if staged_dup || self.inner.key_exists(&record.idempotency_key) {
            return Err(Error::Storage(format!(
                "duplicate idempotency key: {}",
                record.idempotency_key
            )));
        }
        self.staged_records.push(record.clone());
        Ok(record)
    }

    async fn commit(self) -> Result<()> {
        // Re-check uniqueness at commit: a competing transaction may have
        // committed the same key after our insert staged it. This is where a
        // unique index would reject the second writer.
        {
            let transactions = self.inner.transactions.read();
            for staged in &self.staged_records {
                if transactions
                    .iter()
                    .any(|t| t.idempotency_key == staged.idempotency_key)
                {
                    return Err(Error::Storage(format!(
                        "duplicate idempotency key: {}",
                        staged.idempotency_key
                    )));
                }
            }
        }

        let now = Utc::now();
        {
            let mut wallets = self.inner.wallets.write();
            for (wallet_id, balance) in &self.staged_balances {
                if let Some(wallet) = wallets.get_mut(wallet_id) {
                    wallet.balance = *balance;
                    wallet.updated_at = now;
                }
            }
        }
        self.inner
            .transactions
            .write()
            .extend(self.staged_records.clone());

        // Guards drop here, releasing the row locks.
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Staged writes are discarded with self; locks release on drop.
        Ok(())
    }
}
