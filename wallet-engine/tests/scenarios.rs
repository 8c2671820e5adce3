//! End-to-end scenarios through the full stack: facade, queue, consumer,
//! processor, store, and cache wired together the way the service runs.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wallet_core::cache::MemoryCache;
use wallet_core::config::CacheConfig;
use wallet_core::store::{LedgerStore, MemoryStore};
use wallet_core::types::{
    IdempotencyKey, TransactionFilter, TransactionRecord, TransactionStatus, TransactionType,
};
use wallet_core::Error;
use wallet_engine::{Submission, TransactionProcessor, WalletLedger};
use work_queue::{ConsumerConfig, DeadLetters, JobKind, MemoryQueue, QueueConsumer, RetryConfig};

struct Harness {
    ledger: WalletLedger<MemoryStore, MemoryCache, MemoryQueue>,
    store: Arc<MemoryStore>,
    dead_letters: Arc<DeadLetters>,
    queue: MemoryQueue,
    consumer: Option<QueueConsumer>,
}

impl Harness {
    fn spawn_consumer(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            tokio::spawn(consumer.run(self.queue.clone()));
        }
    }
}

/// Wire the stack without draining the queue yet, so a test can line up
/// submissions before any job is applied.
fn build() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let queue = MemoryQueue::new();
    let processor = Arc::new(TransactionProcessor::new(store.clone(), cache.clone()));

    let mut consumer = QueueConsumer::new(ConsumerConfig {
        max_concurrent: 8,
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
    });
    consumer.register(JobKind::Deposit, processor.clone());
    consumer.register(JobKind::Withdraw, processor.clone());
    consumer.register(JobKind::Transfer, processor);
    let dead_letters = consumer.dead_letters();

    let ledger = WalletLedger::new(
        store.clone(),
        cache,
        Arc::new(queue.clone()),
        CacheConfig::default(),
    );
    Harness {
        ledger,
        store,
        dead_letters,
        queue,
        consumer: Some(consumer),
    }
}

fn start() -> Harness {
    let mut h = build();
    h.spawn_consumer();
    h
}

/// Poll until the idempotency key has a row, or panic after two seconds.
async fn settled(store: &MemoryStore, key: &str) -> TransactionRecord {
    for _ in 0..500 {
        if let Some(row) = store
            .transaction_by_key(&IdempotencyKey::new(key))
            .await
            .unwrap()
        {
            return row;
        }
        tokio::time::sleep(Duration::from_millis(4)).await;
    }
    panic!("key {} never settled", key);
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(4)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn deposit_lifecycle() {
    let h = start();
    let wallet = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();

    let submission = h
        .ledger
        .deposit(
            wallet.user_id,
            Decimal::new(15000, 2),
            IdempotencyKey::new("dep-1"),
        )
        .await
        .unwrap();
    let job_id = match submission {
        Submission::Queued { job_id } => job_id,
        other => panic!("expected Queued, got {:?}", other),
    };

    let row = settled(&h.store, "dep-1").await;
    assert_eq!(row.status, TransactionStatus::Completed);
    assert_eq!(row.kind, TransactionType::Deposit);
    assert_eq!(row.metadata.get("job_id"), Some(&job_id.to_string()));

    // The committed balance is visible through the cached read path.
    assert_eq!(
        h.ledger.get_balance(wallet.user_id).await.unwrap(),
        Decimal::new(15000, 2)
    );
    assert!(h.dead_letters.is_empty());
}

#[tokio::test]
async fn resubmitting_a_settled_key_returns_the_prior_outcome() {
    let h = start();
    let wallet = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();

    h.ledger
        .deposit(
            wallet.user_id,
            Decimal::new(10000, 2),
            IdempotencyKey::new("dep-1"),
        )
        .await
        .unwrap();
    let first = settled(&h.store, "dep-1").await;

    let second = h
        .ledger
        .deposit(
            wallet.user_id,
            Decimal::new(10000, 2),
            IdempotencyKey::new("dep-1"),
        )
        .await
        .unwrap();
    match second {
        Submission::AlreadyProcessed { transaction } => assert_eq!(transaction.id, first.id),
        other => panic!("expected AlreadyProcessed, got {:?}", other),
    }

    assert_eq!(
        h.ledger.get_balance(wallet.user_id).await.unwrap(),
        Decimal::new(10000, 2)
    );
}

#[tokio::test]
async fn racing_submissions_with_one_key_apply_once() {
    let mut h = build();
    let wallet = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();

    // Both pass the facade pre-check before either job lands; the
    // processor's in-transaction check resolves the race.
    for _ in 0..2 {
        h.ledger
            .deposit(
                wallet.user_id,
                Decimal::new(10000, 2),
                IdempotencyKey::new("dep-1"),
            )
            .await
            .unwrap();
    }
    h.spawn_consumer();

    settled(&h.store, "dep-1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        h.ledger.get_balance(wallet.user_id).await.unwrap(),
        Decimal::new(10000, 2)
    );
    let page = h
        .ledger
        .list_transactions(wallet.user_id, &TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn overdraft_at_apply_time_records_failure_and_dead_letters() {
    let mut h = build();
    let wallet = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();
    h.store
        .set_balance_unchecked(wallet.id, Decimal::new(5000, 2));

    // Both pass the facade's advisory check against the same balance;
    // whichever applies second overdraws and fails under the lock.
    h.ledger
        .withdraw(
            wallet.user_id,
            Decimal::new(4000, 2),
            IdempotencyKey::new("wd-1"),
        )
        .await
        .unwrap();
    h.ledger
        .withdraw(
            wallet.user_id,
            Decimal::new(4000, 2),
            IdempotencyKey::new("wd-2"),
        )
        .await
        .unwrap();
    h.spawn_consumer();

    let dead_letters = h.dead_letters.clone();
    wait_until(move || !dead_letters.is_empty()).await;

    // One withdrawal committed, the other failed permanently without retry.
    let entries = h.dead_letters.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 1);
    assert!(!entries[0].reprocessable);

    let balance = h.ledger.get_balance(wallet.user_id).await.unwrap();
    assert_eq!(balance, Decimal::new(1000, 2));

    let failed = h
        .ledger
        .list_transactions(
            wallet.user_id,
            &TransactionFilter {
                status: Some(TransactionStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.total, 1);
    assert!(failed.transactions[0].metadata.contains_key("error"));
}

#[tokio::test]
async fn transfer_lifecycle() {
    let h = start();
    let alice = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();
    let bob = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();
    h.store
        .set_balance_unchecked(alice.id, Decimal::new(20000, 2));

    h.ledger
        .transfer(
            alice.user_id,
            bob.id,
            Decimal::new(7500, 2),
            IdempotencyKey::new("tr-1"),
        )
        .await
        .unwrap();

    let debit = settled(&h.store, "tr-1").await;
    let credit = settled(&h.store, "tr-1_CREDIT").await;

    assert_eq!(debit.wallet_id, alice.id);
    assert_eq!(debit.to_wallet_id, Some(bob.id));
    assert_eq!(credit.wallet_id, bob.id);
    assert_eq!(
        credit.metadata.get("original_transaction_id"),
        Some(&debit.id.to_string())
    );

    assert_eq!(
        h.ledger.get_balance(alice.user_id).await.unwrap(),
        Decimal::new(12500, 2)
    );
    assert_eq!(
        h.ledger.get_balance(bob.user_id).await.unwrap(),
        Decimal::new(7500, 2)
    );

    // Each side sees exactly its own leg in history.
    let page = h
        .ledger
        .list_transactions(
            alice.user_id,
            &TransactionFilter {
                kind: Some(TransactionType::Debit),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn concurrent_deposits_all_apply() {
    let h = start();
    let wallet = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();

    for i in 0..20 {
        h.ledger
            .deposit(
                wallet.user_id,
                Decimal::new(100, 2),
                IdempotencyKey::new(format!("dep-{}", i)),
            )
            .await
            .unwrap();
    }

    for i in 0..20 {
        let row = settled(&h.store, &format!("dep-{}", i)).await;
        assert_eq!(row.status, TransactionStatus::Completed);
    }
    assert_eq!(
        h.ledger.get_balance(wallet.user_id).await.unwrap(),
        Decimal::new(2000, 2)
    );
}

#[tokio::test]
async fn opposite_transfers_complete_without_deadlock() {
    let h = start();
    let alice = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();
    let bob = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();
    h.store
        .set_balance_unchecked(alice.id, Decimal::new(50000, 2));
    h.store.set_balance_unchecked(bob.id, Decimal::new(50000, 2));

    for i in 0..10 {
        let (from_user, to_wallet) = if i % 2 == 0 {
            (alice.user_id, bob.id)
        } else {
            (bob.user_id, alice.id)
        };
        h.ledger
            .transfer(
                from_user,
                to_wallet,
                Decimal::new(100, 2),
                IdempotencyKey::new(format!("tr-{}", i)),
            )
            .await
            .unwrap();
    }

    let wait = async {
        for i in 0..10 {
            let row = settled(&h.store, &format!("tr-{}", i)).await;
            assert_eq!(row.status, TransactionStatus::Completed);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("transfers must not deadlock");

    // Equal traffic both ways: balances end where they started.
    assert_eq!(
        h.ledger.get_balance(alice.user_id).await.unwrap(),
        Decimal::new(50000, 2)
    );
    assert_eq!(
        h.ledger.get_balance(bob.user_id).await.unwrap(),
        Decimal::new(50000, 2)
    );
    assert!(h.dead_letters.is_empty());
}

#[tokio::test]
async fn rejected_submissions_never_reach_the_queue() {
    let h = start();
    let wallet = h.ledger.create_wallet(Uuid::new_v4()).await.unwrap();

    let err = h
        .ledger
        .deposit(wallet.user_id, Decimal::ZERO, IdempotencyKey::new("bad-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NonPositiveAmount(_)));

    let err = h
        .ledger
        .withdraw(
            wallet.user_id,
            Decimal::new(100, 2),
            IdempotencyKey::new("bad-2"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientBalance { .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let page = h
        .ledger
        .list_transactions(wallet.user_id, &TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert!(h.dead_letters.is_empty());
}
