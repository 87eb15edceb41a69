//! Integration tests for the Redis caching layer
//!
//! Most of these need a running Redis instance (and one needs Postgres), so
//! they are ignored by default. Run with:
//! REDIS_URL=redis://localhost:6379 cargo test --features cache --test cache_integration_test -- --ignored

#[cfg(feature = "cache")]
mod cache_tests {
    use std::time::Duration;
    use uuid::Uuid;

    use vendora_backend::cache::cache::{ttl, Cache};
    use vendora_backend::cache::keys::{routing, wallet};
    use vendora_backend::cache::{init_cache_pool, CacheConfig, RedisCache};
    use vendora_backend::model::{ServiceType, Wallet};

    async fn setup_cache() -> RedisCache {
        let config = CacheConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            ..Default::default()
        };

        let pool = init_cache_pool(config)
            .await
            .expect("Failed to init cache pool");
        RedisCache::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn wallet_rows_round_trip_under_their_key() {
        let cache = setup_cache().await;
        let owner = Uuid::new_v4();
        let key = wallet::BalanceKey::new(owner).to_string();

        let row = Wallet {
            user_id: owner,
            balance: rust_decimal::Decimal::new(150000, 2),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        cache
            .set(&key, &row, Some(ttl::WALLET_BALANCES))
            .await
            .unwrap();

        let cached: Option<Wallet> = cache.get(&key).await.unwrap();
        let cached = cached.expect("wallet should be cached");
        assert_eq!(cached.user_id, owner);
        assert_eq!(cached.balance, row.balance);

        assert!(<RedisCache as Cache<Wallet>>::delete(&cache, &key)
            .await
            .unwrap());
        assert!(!<RedisCache as Cache<Wallet>>::exists(&cache, &key)
            .await
            .unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn route_entries_expire_with_their_ttl() {
        let cache = setup_cache().await;
        let key = routing::RouteKey::new(ServiceType::Data, "mtn").to_string();

        let vendors = vec!["vtpass".to_string(), "clubkonnect".to_string()];
        cache
            .set(&key, &vendors, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        let present: Option<Vec<String>> = cache.get(&key).await.unwrap();
        assert_eq!(present, Some(vendors));

        tokio::time::sleep(Duration::from_secs(3)).await;

        let expired: Option<Vec<String>> = cache.get(&key).await.unwrap();
        assert_eq!(expired, None);
    }

    #[tokio::test]
    #[ignore] // Requires database and Redis
    async fn wallet_store_reads_through_the_cache() {
        use vendora_backend::database::repository::WalletStore;
        use vendora_backend::database::wallet_repository::PgWalletStore;
        use vendora_backend::database::{init_pool, PoolConfig};

        let cache = setup_cache().await;
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = init_pool(&database_url, Some(PoolConfig::default()))
            .await
            .expect("Failed to init DB pool");

        let store = PgWalletStore::with_cache(pool, cache);
        let owner = Uuid::new_v4();

        let created = store.ensure_wallet(owner).await.unwrap();
        assert_eq!(created.user_id, owner);

        // First read populates the cache, second read is served from it.
        let first = store.find_wallet(owner).await.unwrap().unwrap();
        let second = store.find_wallet(owner).await.unwrap().unwrap();
        assert_eq!(first.balance, second.balance);
        assert_eq!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn unreachable_redis_fails_pool_init() {
        let config = CacheConfig {
            redis_url: "redis://invalid-host:6379".to_string(),
            connection_timeout: Duration::from_millis(100),
            ..Default::default()
        };

        // Callers treat this as "run without cache", so it must surface as
        // an error instead of hanging or panicking.
        let result = init_cache_pool(config).await;
        assert!(result.is_err());
    }
}
