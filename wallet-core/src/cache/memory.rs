//! In-memory cache used by tests and local runs

use crate::cache::{keys, BalanceCache};
use crate::types::TransactionPage;
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// TTL cache over a plain map.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn set(&self, key: String, value: String, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.expires_at > Instant::now());
        entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Number of live entries (test hook)
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether the cache holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BalanceCache for MemoryCache {
    async fn get_balance(&self, wallet_id: Uuid) -> Option<Decimal> {
        let value = self.get(&keys::balance(wallet_id))?;
        serde_json::from_str(&value).ok()
    }

    async fn set_balance(&self, wallet_id: Uuid, balance: Decimal, ttl: Duration) {
        if let Ok(value) = serde_json::to_string(&balance) {
            self.set(keys::balance(wallet_id), value, ttl);
        }
    }

    async fn get_history(&self, key: &str) -> Option<TransactionPage> {
        let value = self.get(key)?;
        serde_json::from_str(&value).ok()
    }

    async fn set_history(&self, key: &str, page: &TransactionPage, ttl: Duration) {
        if let Ok(value) = serde_json::to_string(page) {
            self.set(key.to_string(), value, ttl);
        }
    }

    async fn invalidate_wallet(&self, wallet_id: Uuid) {
        let balance_key = keys::balance(wallet_id);
        let history_prefix = keys::history_prefix(wallet_id);

        let mut entries = self.entries.write();
        entries.remove(&balance_key);
        entries.retain(|key, _| !key.starts_with(&history_prefix));
    }
}
