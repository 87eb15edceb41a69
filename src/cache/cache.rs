//! Generic cache trait and Redis implementation
//!
//! Provides a type-safe, generic interface for caching operations with:
//! - Automatic JSON serialization/deserialization
//! - Configurable TTL management
//! - Fault tolerance (graceful degradation)
//!

use super::{error::CacheResult, RedisPool};
use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

/// Generic cache trait supporting any serializable type
#[async_trait]
pub trait Cache<T: Serialize + DeserializeOwned + Send + Sync + 'static> {
    /// Get a value from cache by key
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    /// Set a value in cache with optional TTL
    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Check if a key exists in cache
    async fn exists(&self, key: &str) -> CacheResult<bool>;
}

/// Redis implementation of the Cache trait
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    /// Create a new Redis cache instance
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool with error handling
    async fn get_connection(&self) -> CacheResult<RedisConnection<'_>> {
        self.pool.get().await.map_err(|e| {
            warn!("Failed to get Redis connection: {}", e);
            e.into()
        })
    }
}

#[async_trait]
impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Cache<T> for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(None), // Graceful degradation
        };

        let result: Option<String> = conn.get(key).await.map_err(|e| {
            warn!("Redis GET failed for key '{}': {}", key, e);
            e
        })?;

        match result {
            Some(json_str) => match serde_json::from_str(&json_str) {
                Ok(value) => {
                    debug!("Cache hit for key: {}", key);
                    Ok(Some(value))
                }
                Err(e) => {
                    // A stale or foreign payload is a miss, not an outage.
                    warn!("Failed to deserialize cache value for key '{}': {}", key, e);
                    Ok(None)
                }
            },
            None => {
                debug!("Cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(()), // Graceful degradation - don't fail
        };

        let json_str = serde_json::to_string(value).map_err(|e| {
            warn!("Failed to serialize value for key '{}': {}", key, e);
            e
        })?;

        match ttl {
            Some(ttl_duration) => {
                let ttl_seconds = ttl_duration.as_secs();
                let _: () = conn.set_ex(key, json_str, ttl_seconds).await.map_err(|e| {
                    warn!("Redis SET_EX failed for key '{}': {}", key, e);
                    e
                })?;
            }
            None => {
                let _: () = conn.set(key, json_str).await.map_err(|e| {
                    warn!("Redis SET failed for key '{}': {}", key, e);
                    e
                })?;
            }
        }

        debug!("Cache set for key: {} (ttl: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false), // Graceful degradation
        };

        let result: i32 = conn.del(key).await.map_err(|e| {
            warn!("Redis DEL failed for key '{}': {}", key, e);
            e
        })?;

        let deleted = result > 0;
        if deleted {
            debug!("Cache delete for key: {}", key);
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false), // Graceful degradation
        };

        let result: i32 = conn.exists(key).await.map_err(|e| {
            warn!("Redis EXISTS failed for key '{}': {}", key, e);
            e
        })?;

        Ok(result > 0)
    }
}

/// TTL constants for different data types
pub mod ttl {
    use std::time::Duration;

    /// Wallet rows: short, balances move often
    pub const WALLET_BALANCES: Duration = Duration::from_secs(45);

    /// Explicit vendor routes: change on admin action only
    pub const VENDOR_ROUTES: Duration = Duration::from_secs(120);

    /// Enabled-vendor lists: change on admin action only
    pub const VENDOR_CONFIGS: Duration = Duration::from_secs(300);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        id: u32,
        name: String,
    }

    // Note: These tests require a running Redis instance
    // Run with: REDIS_URL=redis://localhost:6379 cargo test --features cache

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_basic_cache_operations() {
        let pool = super::super::init_cache_pool(super::super::CacheConfig::default())
            .await
            .unwrap();
        let cache: RedisCache = RedisCache::new(pool);

        let test_data = TestData {
            id: 1,
            name: "test".to_string(),
        };

        // Test set and get
        cache
            .set("test:key", &test_data, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let retrieved = cache.get("test:key").await.unwrap();
        assert_eq!(retrieved, Some(test_data));

        // Test exists
        assert!(<RedisCache as Cache<TestData>>::exists(&cache, "test:key")
            .await
            .unwrap());

        // Test delete
        assert!(<RedisCache as Cache<TestData>>::delete(&cache, "test:key")
            .await
            .unwrap());
        assert!(!<RedisCache as Cache<TestData>>::exists(&cache, "test:key")
            .await
            .unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_corrupt_payload_reads_as_miss() {
        let pool = super::super::init_cache_pool(super::super::CacheConfig::default())
            .await
            .unwrap();
        let cache = RedisCache::new(pool);

        cache
            .set("test:corrupt", &"not-a-test-data".to_string(), None)
            .await
            .unwrap();

        let read: Option<TestData> = cache.get("test:corrupt").await.unwrap();
        assert_eq!(read, None);

        let _ = <RedisCache as Cache<String>>::delete(&cache, "test:corrupt").await;
    }
}
