//! Redis cache
//!
//! Mirrors the memory cache over a shared Redis. Errors are logged and
//! swallowed: the cache must never fail a business operation.

use crate::cache::{keys, BalanceCache};
use crate::error::{Error, Result};
use crate::types::TransactionPage;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("Invalid Redis URL: {}", e)))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Config(format!("Redis connection failed: {}", e)))?;
        Ok(Self { redis })
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        match self.redis.clone().get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                error!("Redis error getting {}: {}", key, e);
                None
            }
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) {
        let ttl_secs = ttl.as_secs().max(1);
        if let Err(e) = self
            .redis
            .clone()
            .set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
        {
            error!("Redis error setting {}: {}", key, e);
        }
    }
}

#[async_trait]
impl BalanceCache for RedisCache {
    async fn get_balance(&self, wallet_id: Uuid) -> Option<Decimal> {
        let value = self.get_raw(&keys::balance(wallet_id)).await?;
        match serde_json::from_str(&value) {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("Failed to deserialize cached balance: {}", e);
                None
            }
        }
    }

    async fn set_balance(&self, wallet_id: Uuid, balance: Decimal, ttl: Duration) {
        match serde_json::to_string(&balance) {
            Ok(value) => self.set_raw(&keys::balance(wallet_id), value, ttl).await,
            Err(e) => error!("Failed to serialize balance: {}", e),
        }
    }

    async fn get_history(&self, key: &str) -> Option<TransactionPage> {
        let value = self.get_raw(key).await?;
        match serde_json::from_str(&value) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!("Failed to deserialize cached history page: {}", e);
                None
            }
        }
    }

    async fn set_history(&self, key: &str, page: &TransactionPage, ttl: Duration) {
        match serde_json::to_string(page) {
            Ok(value) => self.set_raw(key, value, ttl).await,
            Err(e) => error!("Failed to serialize history page: {}", e),
        }
    }

    async fn invalidate_wallet(&self, wallet_id: Uuid) {
        let mut redis = self.redis.clone();

        if let Err(e) = redis.del::<_, ()>(&keys::balance(wallet_id)).await {
            error!("Redis error invalidating balance for {}: {}", wallet_id, e);
        }

        let pattern = format!("{}*", keys::history_prefix(wallet_id));
        match redis.keys::<_, Vec<String>>(&pattern).await {
            Ok(history_keys) if !history_keys.is_empty() => {
                if let Err(e) = redis.del::<_, ()>(&history_keys).await {
                    error!("Redis error invalidating history for {}: {}", wallet_id, e);
                }
            }
            Ok(_) => {}
            Err(e) => error!("Redis error listing history keys for {}: {}", wallet_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with Redis available
    async fn test_redis_round_trip() {
        let cache = RedisCache::connect("redis://localhost:6379").await.unwrap();
        let wallet_id = Uuid::new_v4();

        cache
            .set_balance(wallet_id, Decimal::new(10000, 2), Duration::from_secs(10))
            .await;
        assert_eq!(
            cache.get_balance(wallet_id).await,
            Some(Decimal::new(10000, 2))
        );

        cache.invalidate_wallet(wallet_id).await;
        assert!(cache.get_balance(wallet_id).await.is_none());
    }
}
