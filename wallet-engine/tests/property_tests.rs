//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - No wallet balance ever goes negative
//! - Conservation: transfers move money, they never create or destroy it
//! - The processor accepts and rejects exactly what a sequential model does

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;
use wallet_core::cache::MemoryCache;
use wallet_core::store::{LedgerStore, MemoryStore};
use wallet_core::types::{DepositPayload, IdempotencyKey, TransferPayload, WithdrawPayload};
use wallet_engine::TransactionProcessor;

const WALLETS: usize = 3;
const SEED_CENTS: i64 = 100_00;

#[derive(Debug, Clone)]
enum Op {
    Deposit { wallet: usize, cents: i64 },
    Withdraw { wallet: usize, cents: i64 },
    Transfer { from: usize, to: usize, cents: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let cents = 1i64..150_00;
    prop_oneof![
        (0..WALLETS, cents.clone()).prop_map(|(wallet, cents)| Op::Deposit { wallet, cents }),
        (0..WALLETS, cents.clone()).prop_map(|(wallet, cents)| Op::Withdraw { wallet, cents }),
        (0..WALLETS, 0..WALLETS, cents)
            .prop_map(|(from, to, cents)| Op::Transfer { from, to, cents }),
    ]
}

async fn seeded_ledger() -> (
    TransactionProcessor<MemoryStore, MemoryCache>,
    Arc<MemoryStore>,
    Vec<Uuid>,
) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let mut wallet_ids = Vec::with_capacity(WALLETS);
    for _ in 0..WALLETS {
        let wallet = store.create_wallet(Uuid::new_v4()).await.unwrap();
        store.set_balance_unchecked(wallet.id, Decimal::new(SEED_CENTS, 2));
        wallet_ids.push(wallet.id);
    }
    (
        TransactionProcessor::new(store.clone(), cache),
        store,
        wallet_ids,
    )
}

async fn balance(store: &MemoryStore, wallet_id: Uuid) -> Decimal {
    store.wallet_by_id(wallet_id).await.unwrap().unwrap().balance
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: after any sequence of operations, every balance matches a
    /// sequential model, nothing goes negative, and money is conserved.
    #[test]
    fn prop_balances_match_sequential_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (processor, store, wallet_ids) = seeded_ledger().await;

            let mut model = vec![Decimal::new(SEED_CENTS, 2); WALLETS];
            let mut external_flow = Decimal::ZERO;

            for (i, op) in ops.iter().enumerate() {
                let key = IdempotencyKey::new(format!("op-{}", i));
                match *op {
                    Op::Deposit { wallet, cents } => {
                        let amount = Decimal::new(cents, 2);
                        let payload = DepositPayload {
                            wallet_id: wallet_ids[wallet],
                            amount,
                            transaction_id: key,
                        };
                        processor.process_deposit(&payload, Uuid::now_v7()).await.unwrap();
                        model[wallet] += amount;
                        external_flow += amount;
                    }
                    Op::Withdraw { wallet, cents } => {
                        let amount = Decimal::new(cents, 2);
                        let payload = WithdrawPayload {
                            wallet_id: wallet_ids[wallet],
                            amount,
                            transaction_id: key,
                        };
                        let result = processor.process_withdrawal(&payload, Uuid::now_v7()).await;
                        if model[wallet] >= amount {
                            prop_assert!(result.is_ok());
                            model[wallet] -= amount;
                            external_flow -= amount;
                        } else {
                            prop_assert!(result.is_err());
                        }
                    }
                    Op::Transfer { from, to, cents } => {
                        let amount = Decimal::new(cents, 2);
                        let payload = TransferPayload {
                            from_wallet_id: wallet_ids[from],
                            to_wallet_id: wallet_ids[to],
                            amount,
                            transaction_id: key,
                        };
                        let result = processor.process_transfer(&payload, Uuid::now_v7()).await;
                        if model[from] >= amount {
                            prop_assert!(result.is_ok());
                            model[from] -= amount;
                            model[to] += amount;
                        } else {
                            prop_assert!(result.is_err());
                        }
                    }
                }
            }

            let mut total = Decimal::ZERO;
            for (i, wallet_id) in wallet_ids.iter().enumerate() {
                let actual = balance(&store, *wallet_id).await;
                prop_assert_eq!(actual, model[i]);
                prop_assert!(actual >= Decimal::ZERO);
                total += actual;
            }

            // Conservation: the pool only moves by external deposits and
            // withdrawals, never by transfers.
            let seed_total = Decimal::new(SEED_CENTS * WALLETS as i64, 2);
            prop_assert_eq!(total, seed_total + external_flow);
            Ok(())
        })?;
    }

    /// Property: redelivering every job a second time changes nothing.
    #[test]
    fn prop_redelivery_is_a_noop(deposits in prop::collection::vec(1i64..100_00, 1..10)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (processor, store, wallet_ids) = seeded_ledger().await;
            let wallet_id = wallet_ids[0];

            let mut payloads = Vec::new();
            for (i, cents) in deposits.iter().enumerate() {
                let payload = DepositPayload {
                    wallet_id,
                    amount: Decimal::new(*cents, 2),
                    transaction_id: IdempotencyKey::new(format!("dep-{}", i)),
                };
                processor.process_deposit(&payload, Uuid::now_v7()).await.unwrap();
                payloads.push(payload);
            }
            let after_first_pass = balance(&store, wallet_id).await;

            for payload in &payloads {
                processor.process_deposit(payload, Uuid::now_v7()).await.unwrap();
            }
            prop_assert_eq!(balance(&store, wallet_id).await, after_first_pass);
            Ok(())
        })?;
    }
}
