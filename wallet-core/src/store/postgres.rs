//! Postgres ledger store
//!
//! Row locks are `SELECT ... FOR UPDATE`; the unique index on
//! `transaction_id` enforces the idempotency-key constraint; the table
//! check constraint keeps balances non-negative even if a bug slips past
//! the processor. Schema lives under `wallet-core/migrations/`.

use crate::error::{Error, Result};
use crate::store::{LedgerStore, LedgerTransaction};
use crate::types::{
    IdempotencyKey, TransactionFilter, TransactionPage, TransactionRecord, TransactionStatus,
    TransactionType, Wallet,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

const WALLET_COLUMNS: &str = "id, user_id, balance, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, wallet_id, type, amount, transaction_id, to_wallet_id, status, metadata, created_at, updated_at";

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect a pool with a per-connection statement timeout, the store's
    /// bounded execution-time ceiling for slow lock holders.
    pub async fn connect(config: &crate::config::DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let timeout_ms = config.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {}", timeout_ms))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        sqlx::query("SELECT 1").fetch_one(&pool).await?;
        info!("Database connection verified");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<TransactionRecord> {
    let kind: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let key: String = row.try_get("transaction_id")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: HashMap<String, String> =
        serde_json::from_value(metadata).unwrap_or_default();

    Ok(TransactionRecord {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        kind: TransactionType::parse(&kind)
            .ok_or_else(|| Error::Storage(format!("unknown transaction type: {}", kind)))?,
        amount: row.try_get("amount")?,
        idempotency_key: IdempotencyKey::new(key),
        to_wallet_id: row.try_get("to_wallet_id")?,
        status: TransactionStatus::parse(&status)
            .ok_or_else(|| Error::Storage(format!("unknown transaction status: {}", status)))?,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn insert_record<'e, E>(executor: E, record: &TransactionRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let metadata = serde_json::to_value(&record.metadata)
        .map_err(|e| Error::Storage(e.to_string()))?;

    sqlx::query(
        "INSERT INTO transactions \
         (id, wallet_id, type, amount, transaction_id, to_wallet_id, status, metadata, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(record.id)
    .bind(record.wallet_id)
    .bind(record.kind.as_str())
    .bind(record.amount)
    .bind(record.idempotency_key.as_str())
    .bind(record.to_wallet_id)
    .bind(record.status.as_str())
    .bind(metadata)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTransaction { tx })
    }

    async fn wallet_by_user(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn wallet_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn transaction_by_key(&self, key: &IdempotencyKey) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn transaction_by_id(
        &self,
        wallet_id: Uuid,
        id: Uuid,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1 AND wallet_id = $2",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage> {
        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM transactions WHERE wallet_id = ");
        count_qb.push_bind(wallet_id);
        push_filters(&mut count_qb, filter);

        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.try_get(0)?;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM transactions WHERE wallet_id = ",
            TRANSACTION_COLUMNS
        ));
        qb.push_bind(wallet_id);
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(i64::from(filter.limit));
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset() as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let transactions = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(TransactionPage::new(transactions, filter, total as u64))
    }

    async fn create_wallet(&self, user_id: Uuid) -> Result<Wallet> {
        let now = Utc::now();
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            "INSERT INTO wallets (id, user_id, balance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(wallet),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::WalletExists(user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_transaction(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        insert_record(&self.pool, &record).await?;
        Ok(record)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    if let Some(kind) = filter.kind {
        qb.push(" AND type = ");
        qb.push_bind(kind.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND created_at >= ");
        qb.push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND created_at <= ");
        qb.push_bind(end);
    }
}

/// Open Postgres transaction. Dropping it without commit rolls back.
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn transaction_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn lock_wallet_pair(&mut self, first: Uuid, second: Uuid) -> Result<Vec<Wallet>> {
        // ORDER BY id keeps the acquisition order aligned with the policy's
        // sorted lock order.
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE id = $1 OR id = $2 ORDER BY id FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(first)
        .bind(second)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(wallet_from_row).collect()
    }

    async fn update_balance(&mut self, wallet_id: Uuid, balance: Decimal) -> Result<()> {
        sqlx::query("UPDATE wallets SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(balance)
            .bind(Utc::now())
            .bind(wallet_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_transaction(&mut self, record: TransactionRecord) -> Result<TransactionRecord> {
        insert_record(&mut *self.tx, &record).await?;
        Ok(record)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
