//! Wallet ledger server binary
//!
//! Composition root for a single-process deployment: the facade and the
//! queue consumer share one in-process queue, so every submission made
//! through the facade is applied by the worker pool in this process.

use std::error::Error;
use std::sync::Arc;
use wallet_core::cache::RedisCache;
use wallet_core::store::PgLedgerStore;
use wallet_core::Config;
use wallet_engine::{TransactionProcessor, WalletLedger};
use work_queue::{ConsumerConfig, JobKind, MemoryQueue, QueueConsumer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting {} v{}",
        config.service_name,
        config.service_version
    );

    let store = Arc::new(PgLedgerStore::connect(&config.database).await?);
    let cache = Arc::new(RedisCache::connect(&config.cache.redis_url).await?);
    let processor = Arc::new(TransactionProcessor::new(store.clone(), cache.clone()));

    let queue = MemoryQueue::new();
    let mut consumer = QueueConsumer::new(ConsumerConfig::default());
    consumer.register(JobKind::Deposit, processor.clone());
    consumer.register(JobKind::Withdraw, processor.clone());
    consumer.register(JobKind::Transfer, processor);
    let consumer_task = tokio::spawn(consumer.run(queue.clone()));

    // TODO: front the facade with the HTTP API surface
    let _ledger = WalletLedger::new(store, cache, Arc::new(queue), config.cache);
    tracing::info!("Ledger facade ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
        result = consumer_task => {
            result??;
        }
    }

    Ok(())
}
