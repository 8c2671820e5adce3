//! Balance cache boundary
//!
//! The cache is a disposable, recomputable accelerator, never authoritative.
//! Every call is best-effort: a cache failure is logged and never fails the
//! surrounding business operation. Divergence self-heals via TTL expiry even
//! if an invalidation is lost, so TTLs are kept short.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use crate::types::TransactionPage;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

/// Cache key scheme
pub mod keys {
    use crate::types::TransactionFilter;
    use uuid::Uuid;

    /// Balance entry for one wallet
    pub fn balance(wallet_id: Uuid) -> String {
        format!("wallet:balance:{}", wallet_id)
    }

    /// Paginated-history entry for one wallet and filter
    pub fn history(wallet_id: Uuid, filter: &TransactionFilter) -> String {
        // serde_json struct field order is stable, so equal filters produce
        // equal keys.
        let filter = serde_json::to_string(filter).unwrap_or_default();
        format!("transactions:{}:{}", wallet_id, filter)
    }

    /// Prefix covering every history entry for one wallet
    pub fn history_prefix(wallet_id: Uuid) -> String {
        format!("transactions:{}:", wallet_id)
    }
}

/// Key-value cache with TTL and explicit invalidation.
#[async_trait]
pub trait BalanceCache: Send + Sync + 'static {
    /// Cached balance, if present and fresh.
    async fn get_balance(&self, wallet_id: Uuid) -> Option<Decimal>;

    /// Cache a balance with a bounded TTL.
    async fn set_balance(&self, wallet_id: Uuid, balance: Decimal, ttl: Duration);

    /// Cached history page, if present and fresh.
    async fn get_history(&self, key: &str) -> Option<TransactionPage>;

    /// Cache a history page with a bounded TTL.
    async fn set_history(&self, key: &str, page: &TransactionPage, ttl: Duration);

    /// Drop the balance entry and every paginated-history entry for this
    /// wallet (pattern-based key removal).
    async fn invalidate_wallet(&self, wallet_id: Uuid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionFilter;

    #[test]
    fn test_key_scheme() {
        let wallet_id = Uuid::nil();
        assert_eq!(
            keys::balance(wallet_id),
            "wallet:balance:00000000-0000-0000-0000-000000000000"
        );
        assert!(keys::history(wallet_id, &TransactionFilter::default())
            .starts_with(&keys::history_prefix(wallet_id)));
    }

    #[test]
    fn test_equal_filters_share_a_key() {
        let wallet_id = Uuid::new_v4();
        let a = keys::history(wallet_id, &TransactionFilter::default());
        let b = keys::history(wallet_id, &TransactionFilter::default());
        assert_eq!(a, b);

        let c = keys::history(
            wallet_id,
            &TransactionFilter {
                page: 2,
                ..Default::default()
            },
        );
        assert_ne!(a, c);
    }
}
