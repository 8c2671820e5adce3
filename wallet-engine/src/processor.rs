//! Transaction processor
//!
//! Consumes queued mutations and applies them under store-level row locks.
//! All authoritative decisions happen here, inside one store transaction:
//! the idempotency check, the balance check, the balance update, and the
//! transaction row insert commit or roll back together. The cache is
//! invalidated only after commit, so a reader never observes a balance the
//! store has not durably accepted.

use crate::metrics::{TRANSACTIONS_TOTAL, TRANSACTION_APPLY_DURATION};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;
use wallet_core::cache::BalanceCache;
use wallet_core::policy;
use wallet_core::store::{LedgerStore, LedgerTransaction};
use wallet_core::types::{
    DepositPayload, IdempotencyKey, TransactionRecord, TransactionType, TransferPayload,
    WithdrawPayload,
};
use wallet_core::{Error, Result};
use work_queue::{Job, JobError, JobHandler, JobKind};

/// How one delivery resolved.
#[derive(Debug, PartialEq, Eq)]
enum Applied {
    /// This delivery committed the mutation
    Committed,
    /// The idempotency key already had a row; nothing was changed
    Duplicate,
}

/// Applies queued transactions against the store.
pub struct TransactionProcessor<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
}

impl<S, C> TransactionProcessor<S, C>
where
    S: LedgerStore,
    C: BalanceCache,
{
    /// Create a processor over its collaborators
    pub fn new(store: Arc<S>, cache: Arc<C>) -> Self {
        Self { store, cache }
    }

    /// Apply a deposit job.
    pub async fn process_deposit(&self, payload: &DepositPayload, job_id: Uuid) -> Result<()> {
        let start = Instant::now();
        let outcome = self.try_deposit(payload, job_id).await;
        TRANSACTION_APPLY_DURATION
            .with_label_values(&["deposit"])
            .observe(start.elapsed().as_secs_f64());

        match outcome {
            Ok(Applied::Committed) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["deposit", "completed"])
                    .inc();
                self.cache.invalidate_wallet(payload.wallet_id).await;
                info!(
                    "Deposited {} into wallet {} (key {})",
                    payload.amount, payload.wallet_id, payload.transaction_id
                );
                Ok(())
            }
            Ok(Applied::Duplicate) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["deposit", "duplicate"])
                    .inc();
                Ok(())
            }
            Err(err) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["deposit", "failed"])
                    .inc();
                if !err.is_retryable() {
                    let record = TransactionRecord::failed(
                        payload.wallet_id,
                        TransactionType::Deposit,
                        payload.amount,
                        payload.transaction_id.clone(),
                        &err.to_string(),
                        job_id,
                    );
                    self.record_failure(record).await;
                }
                Err(err)
            }
        }
    }

    /// Apply a withdrawal job.
    pub async fn process_withdrawal(&self, payload: &WithdrawPayload, job_id: Uuid) -> Result<()> {
        let start = Instant::now();
        let outcome = self.try_withdrawal(payload, job_id).await;
        TRANSACTION_APPLY_DURATION
            .with_label_values(&["withdraw"])
            .observe(start.elapsed().as_secs_f64());

        match outcome {
            Ok(Applied::Committed) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["withdraw", "completed"])
                    .inc();
                self.cache.invalidate_wallet(payload.wallet_id).await;
                info!(
                    "Withdrew {} from wallet {} (key {})",
                    payload.amount, payload.wallet_id, payload.transaction_id
                );
                Ok(())
            }
            Ok(Applied::Duplicate) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["withdraw", "duplicate"])
                    .inc();
                Ok(())
            }
            Err(err) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["withdraw", "failed"])
                    .inc();
                if !err.is_retryable() {
                    let record = TransactionRecord::failed(
                        payload.wallet_id,
                        TransactionType::Withdrawal,
                        payload.amount,
                        payload.transaction_id.clone(),
                        &err.to_string(),
                        job_id,
                    );
                    self.record_failure(record).await;
                }
                Err(err)
            }
        }
    }

    /// Apply a transfer job: one debit leg, one credit leg, one commit.
    pub async fn process_transfer(&self, payload: &TransferPayload, job_id: Uuid) -> Result<()> {
        let start = Instant::now();
        let outcome = self.try_transfer(payload, job_id).await;
        TRANSACTION_APPLY_DURATION
            .with_label_values(&["transfer"])
            .observe(start.elapsed().as_secs_f64());

        match outcome {
            Ok(Applied::Committed) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["transfer", "completed"])
                    .inc();
                tokio::join!(
                    self.cache.invalidate_wallet(payload.from_wallet_id),
                    self.cache.invalidate_wallet(payload.to_wallet_id),
                );
                info!(
                    "Transferred {} from wallet {} to wallet {} (key {})",
                    payload.amount,
                    payload.from_wallet_id,
                    payload.to_wallet_id,
                    payload.transaction_id
                );
                Ok(())
            }
            Ok(Applied::Duplicate) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["transfer", "duplicate"])
                    .inc();
                Ok(())
            }
            Err(err) => {
                TRANSACTIONS_TOTAL
                    .with_label_values(&["transfer", "failed"])
                    .inc();
                if !err.is_retryable() {
                    let record = TransactionRecord::failed(
                        payload.from_wallet_id,
                        TransactionType::Debit,
                        payload.amount,
                        payload.transaction_id.clone(),
                        &err.to_string(),
                        job_id,
                    )
                    .with_to_wallet(payload.to_wallet_id);
                    self.record_failure(record).await;
                }
                Err(err)
            }
        }
    }

    async fn try_deposit(&self, payload: &DepositPayload, job_id: Uuid) -> Result<Applied> {
        ensure_positive(payload.amount)?;

        let mut tx = self.store.begin().await?;
        let wallet = tx
            .lock_wallet(payload.wallet_id)
            .await?
            .ok_or(Error::WalletNotFound(payload.wallet_id))?;

        if self.already_applied(&mut tx, &payload.transaction_id).await? {
            return Ok(Applied::Duplicate);
        }

        tx.update_balance(wallet.id, wallet.balance + payload.amount)
            .await?;
        tx.insert_transaction(TransactionRecord::completed(
            wallet.id,
            TransactionType::Deposit,
            payload.amount,
            payload.transaction_id.clone(),
            job_id,
        ))
        .await?;
        tx.commit().await?;
        Ok(Applied::Committed)
    }

    async fn try_withdrawal(&self, payload: &WithdrawPayload, job_id: Uuid) -> Result<Applied> {
        ensure_positive(payload.amount)?;

        let mut tx = self.store.begin().await?;
        let wallet = tx
            .lock_wallet(payload.wallet_id)
            .await?
            .ok_or(Error::WalletNotFound(payload.wallet_id))?;

        if self.already_applied(&mut tx, &payload.transaction_id).await? {
            return Ok(Applied::Duplicate);
        }

        if wallet.balance < payload.amount {
            return Err(Error::InsufficientBalance {
                available: wallet.balance,
                requested: payload.amount,
            });
        }

        tx.update_balance(wallet.id, wallet.balance - payload.amount)
            .await?;
        tx.insert_transaction(TransactionRecord::completed(
            wallet.id,
            TransactionType::Withdrawal,
            payload.amount,
            payload.transaction_id.clone(),
            job_id,
        ))
        .await?;
        tx.commit().await?;
        Ok(Applied::Committed)
    }

    async fn try_transfer(&self, payload: &TransferPayload, job_id: Uuid) -> Result<Applied> {
        ensure_positive(payload.amount)?;

        let from = payload.from_wallet_id;
        let to = payload.to_wallet_id;

        // Fixed global acquisition order keeps opposite-direction transfers
        // between the same pair from deadlocking.
        let (first, second) = policy::lock_order(from, to);

        let mut tx = self.store.begin().await?;
        let wallets = tx.lock_wallet_pair(first, second).await?;

        let [debit_key, credit_key] = policy::transfer_keys(&payload.transaction_id);
        if self.already_applied(&mut tx, &debit_key).await? {
            return Ok(Applied::Duplicate);
        }

        // Both legs mutate this map, so a self-transfer nets to zero instead
        // of fabricating money.
        let mut balances: HashMap<Uuid, Decimal> =
            wallets.iter().map(|w| (w.id, w.balance)).collect();

        let from_balance = match balances.get(&from) {
            Some(balance) => *balance,
            None => return Err(Error::WalletPairNotFound),
        };
        if !balances.contains_key(&to) {
            return Err(Error::WalletPairNotFound);
        }

        if from_balance < payload.amount {
            return Err(Error::InsufficientBalance {
                available: from_balance,
                requested: payload.amount,
            });
        }

        if let Some(balance) = balances.get_mut(&from) {
            *balance -= payload.amount;
        }
        if let Some(balance) = balances.get_mut(&to) {
            *balance += payload.amount;
        }

        for (wallet_id, new_balance) in &balances {
            tx.update_balance(*wallet_id, *new_balance).await?;
        }

        let debit = tx
            .insert_transaction(
                TransactionRecord::completed(
                    from,
                    TransactionType::Debit,
                    payload.amount,
                    debit_key,
                    job_id,
                )
                .with_to_wallet(to),
            )
            .await?;
        tx.insert_transaction(
            TransactionRecord::completed(
                to,
                TransactionType::Credit,
                payload.amount,
                credit_key,
                job_id,
            )
            .with_metadata("original_transaction_id", debit.id.to_string()),
        )
        .await?;

        tx.commit().await?;
        Ok(Applied::Committed)
    }

    /// Authoritative duplicate check, run while holding the row lock(s).
    /// Any prior row for the key, COMPLETED or FAILED, is terminal.
    async fn already_applied<T: LedgerTransaction>(
        &self,
        tx: &mut T,
        key: &IdempotencyKey,
    ) -> Result<bool> {
        match tx.transaction_by_key(key).await? {
            Some(existing) => {
                info!(
                    "Duplicate transaction detected: key {} already resolved as {}",
                    key, existing.status
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Best-effort FAILED row, written outside any transaction after the
    /// rollback. If the store is the thing that is broken, this fails too;
    /// that is acceptable, the ledger never records FAILED rows at the
    /// expense of availability.
    async fn record_failure(&self, record: TransactionRecord) {
        if let Err(e) = self.store.insert_transaction(record).await {
            warn!("Could not record FAILED transaction row: {}", e);
        }
    }
}

#[async_trait]
impl<S, C> JobHandler for TransactionProcessor<S, C>
where
    S: LedgerStore,
    C: BalanceCache,
{
    async fn handle(&self, job: Job) -> std::result::Result<(), JobError> {
        let result = match job.kind {
            JobKind::Deposit => {
                let payload: DepositPayload = job
                    .payload_as()
                    .map_err(|e| JobError::Permanent(e.to_string()))?;
                self.process_deposit(&payload, job.id).await
            }
            JobKind::Withdraw => {
                let payload: WithdrawPayload = job
                    .payload_as()
                    .map_err(|e| JobError::Permanent(e.to_string()))?;
                self.process_withdrawal(&payload, job.id).await
            }
            JobKind::Transfer => {
                let payload: TransferPayload = job
                    .payload_as()
                    .map_err(|e| JobError::Permanent(e.to_string()))?;
                self.process_transfer(&payload, job.id).await
            }
        };

        result.map_err(|err| {
            if err.is_retryable() {
                JobError::Retryable(err.to_string())
            } else {
                JobError::Permanent(err.to_string())
            }
        })
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::NonPositiveAmount(amount));
    }
    Ok(())
}
