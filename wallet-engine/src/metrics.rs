//! Prometheus metrics for the wallet engine

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Transaction outcomes by type
    pub static ref TRANSACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "wallet_transactions_total",
        "Transaction outcomes by type",
        &["type", "outcome"]
    )
    .unwrap();

    /// Time spent applying a transaction, lock wait included
    pub static ref TRANSACTION_APPLY_DURATION: HistogramVec = register_histogram_vec!(
        "wallet_transaction_apply_duration_seconds",
        "Transaction apply duration in seconds",
        &["type"]
    )
    .unwrap();

    /// Cache lookups by kind and result
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "wallet_cache_lookups_total",
        "Cache lookups by kind and result",
        &["kind", "result"]
    )
    .unwrap();

    /// Submissions accepted by the facade
    pub static ref SUBMISSIONS_TOTAL: CounterVec = register_counter_vec!(
        "wallet_submissions_total",
        "Submissions accepted by the facade",
        &["type", "disposition"]
    )
    .unwrap();
}
