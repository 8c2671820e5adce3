//! Synchronous wallet API
//!
//! Operations are keyed by the owning user; the facade resolves the user's
//! wallet before doing anything else. Reads are served directly (cache
//! first, store on miss). Mutations are validated, pre-checked for
//! duplicates, and enqueued; the durable outcome is decided later by the
//! processor under row locks. The pre-checks here are a fast-path courtesy
//! only, the in-transaction checks in the processor are authoritative.

use crate::metrics::{CACHE_LOOKUPS_TOTAL, SUBMISSIONS_TOTAL};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use wallet_core::cache::{keys, BalanceCache};
use wallet_core::config::CacheConfig;
use wallet_core::store::LedgerStore;
use wallet_core::types::{
    DepositPayload, IdempotencyKey, TransactionFilter, TransactionPage, TransactionRecord,
    TransferPayload, Wallet, WithdrawPayload,
};
use wallet_core::{Error, Result};
use work_queue::{Job, JobKind, WorkQueue};

/// Outcome of submitting a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Accepted; the outcome will be decided asynchronously
    Queued {
        /// Queue job id, recorded in the resulting transaction row's metadata
        job_id: Uuid,
    },
    /// The idempotency key already resolved; here is the prior outcome
    AlreadyProcessed {
        /// The existing transaction row for this key
        transaction: TransactionRecord,
    },
}

/// Client-facing wallet operations.
pub struct WalletLedger<S, C, Q> {
    store: Arc<S>,
    cache: Arc<C>,
    queue: Arc<Q>,
    cache_config: CacheConfig,
}

impl<S, C, Q> WalletLedger<S, C, Q>
where
    S: LedgerStore,
    C: BalanceCache,
    Q: WorkQueue,
{
    /// Create a facade over its collaborators
    pub fn new(store: Arc<S>, cache: Arc<C>, queue: Arc<Q>, cache_config: CacheConfig) -> Self {
        Self {
            store,
            cache,
            queue,
            cache_config,
        }
    }

    fn balance_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_config.balance_ttl_secs)
    }

    fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_config.history_ttl_secs)
    }

    /// Create a zero-balance wallet for a user. One wallet per user.
    pub async fn create_wallet(&self, user_id: Uuid) -> Result<Wallet> {
        let wallet = self.store.create_wallet(user_id).await?;
        info!("Created wallet {} for user {}", wallet.id, user_id);

        // Seed the cache so the first balance read is a hit.
        self.cache
            .set_balance(wallet.id, wallet.balance, self.balance_ttl())
            .await;

        Ok(wallet)
    }

    /// Resolve the caller's wallet.
    pub async fn wallet_for_user(&self, user_id: Uuid) -> Result<Wallet> {
        self.store
            .wallet_by_user(user_id)
            .await?
            .ok_or(Error::WalletNotFound(user_id))
    }

    /// Current balance of the user's wallet, read through the cache.
    pub async fn get_balance(&self, user_id: Uuid) -> Result<Decimal> {
        let wallet = self.wallet_for_user(user_id).await?;

        if let Some(balance) = self.cache.get_balance(wallet.id).await {
            CACHE_LOOKUPS_TOTAL
                .with_label_values(&["balance", "hit"])
                .inc();
            debug!("Balance cache hit for wallet {}", wallet.id);
            return Ok(balance);
        }
        CACHE_LOOKUPS_TOTAL
            .with_label_values(&["balance", "miss"])
            .inc();

        self.cache
            .set_balance(wallet.id, wallet.balance, self.balance_ttl())
            .await;
        Ok(wallet.balance)
    }

    /// Submit a deposit into the user's wallet.
    pub async fn deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_id: IdempotencyKey,
    ) -> Result<Submission> {
        ensure_positive(amount)?;
        let wallet = self.wallet_for_user(user_id).await?;

        if let Some(existing) = self.prior_outcome(&transaction_id).await? {
            return Ok(existing);
        }

        let payload = DepositPayload {
            wallet_id: wallet.id,
            amount,
            transaction_id,
        };
        self.submit(JobKind::Deposit, &payload).await
    }

    /// Submit a withdrawal from the user's wallet. The balance check here
    /// rejects obviously doomed requests early; the processor re-checks
    /// under the row lock.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_id: IdempotencyKey,
    ) -> Result<Submission> {
        ensure_positive(amount)?;
        let wallet = self.wallet_for_user(user_id).await?;

        // A resolved key wins over every other check: resubmitting a
        // settled withdrawal is a no-op even if the balance has since
        // dropped below the amount.
        if let Some(existing) = self.prior_outcome(&transaction_id).await? {
            return Ok(existing);
        }

        if wallet.balance < amount {
            return Err(Error::InsufficientBalance {
                available: wallet.balance,
                requested: amount,
            });
        }

        let payload = WithdrawPayload {
            wallet_id: wallet.id,
            amount,
            transaction_id,
        };
        self.submit(JobKind::Withdraw, &payload).await
    }

    /// Submit a transfer from the user's wallet to a destination wallet.
    pub async fn transfer(
        &self,
        user_id: Uuid,
        to_wallet_id: Uuid,
        amount: Decimal,
        transaction_id: IdempotencyKey,
    ) -> Result<Submission> {
        ensure_positive(amount)?;

        let from = self.wallet_for_user(user_id).await?;

        if let Some(existing) = self.prior_outcome(&transaction_id).await? {
            return Ok(existing);
        }

        self.store
            .wallet_by_id(to_wallet_id)
            .await?
            .ok_or(Error::WalletNotFound(to_wallet_id))?;
        if from.balance < amount {
            return Err(Error::InsufficientBalance {
                available: from.balance,
                requested: amount,
            });
        }

        let payload = TransferPayload {
            from_wallet_id: from.id,
            to_wallet_id,
            amount,
            transaction_id,
        };
        self.submit(JobKind::Transfer, &payload).await
    }

    /// Paginated, filtered history of the user's wallet, read through the
    /// cache.
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage> {
        let wallet = self.wallet_for_user(user_id).await?;

        let key = keys::history(wallet.id, filter);
        if let Some(page) = self.cache.get_history(&key).await {
            CACHE_LOOKUPS_TOTAL
                .with_label_values(&["history", "hit"])
                .inc();
            return Ok(page);
        }
        CACHE_LOOKUPS_TOTAL
            .with_label_values(&["history", "miss"])
            .inc();

        let page = self.store.list_transactions(wallet.id, filter).await?;
        self.cache.set_history(&key, &page, self.history_ttl()).await;
        Ok(page)
    }

    /// Look up one transaction row, scoped to the user's wallet.
    pub async fn get_transaction(&self, user_id: Uuid, id: Uuid) -> Result<TransactionRecord> {
        let wallet = self.wallet_for_user(user_id).await?;
        self.store
            .transaction_by_id(wallet.id, id)
            .await?
            .ok_or(Error::TransactionNotFound(id))
    }

    async fn prior_outcome(&self, transaction_id: &IdempotencyKey) -> Result<Option<Submission>> {
        match self.store.transaction_by_key(transaction_id).await? {
            Some(transaction) => {
                info!(
                    "Idempotency key {} already resolved as {}",
                    transaction_id, transaction.status
                );
                Ok(Some(Submission::AlreadyProcessed { transaction }))
            }
            None => Ok(None),
        }
    }

    async fn submit<P: serde::Serialize>(&self, kind: JobKind, payload: &P) -> Result<Submission> {
        let job = Job::new(kind, payload).map_err(|e| Error::Queue(e.to_string()))?;
        let job_ref = self
            .queue
            .enqueue(job)
            .await
            .map_err(|e| Error::Queue(e.to_string()))?;

        SUBMISSIONS_TOTAL
            .with_label_values(&[kind.as_str(), "queued"])
            .inc();
        debug!("Queued {} job {}", kind, job_ref.id);
        Ok(Submission::Queued { job_id: job_ref.id })
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::NonPositiveAmount(amount));
    }
    Ok(())
}
