use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::VendorConfigStore;
use crate::model::{ServiceType, VendorConfig};

#[cfg(feature = "cache")]
use crate::cache::{cache::ttl, keys::routing::VendorsKey, Cache, RedisCache};
#[cfg(feature = "cache")]
use tracing::debug;

/// Postgres-backed vendor config store.
///
/// `list_enabled_for` sits on the hot purchase path and is cached; the
/// admin-facing reads go straight to the database.
pub struct PgVendorConfigStore {
    pool: PgPool,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
}

impl PgVendorConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            #[cfg(feature = "cache")]
            cache: None,
        }
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(pool: PgPool, cache: RedisCache) -> Self {
        Self {
            pool,
            cache: Some(cache),
        }
    }
}

#[async_trait]
impl VendorConfigStore for PgVendorConfigStore {
    async fn list_all(&self) -> DbResult<Vec<VendorConfig>> {
        sqlx::query_as::<_, VendorConfig>(
            "SELECT id, adapter_id, display_name, services, is_enabled, priority,
                    settings, created_at, updated_at
             FROM vendor_configs
             ORDER BY priority ASC, adapter_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_enabled_for(&self, service_type: ServiceType) -> DbResult<Vec<VendorConfig>> {
        #[cfg(feature = "cache")]
        if let Some(ref cache) = self.cache {
            let key = VendorsKey::new(service_type).to_string();
            if let Ok(Some(cached)) =
                <RedisCache as Cache<Vec<VendorConfig>>>::get(cache, &key).await
            {
                debug!("Cache hit for enabled vendors: {}", key);
                return Ok(cached);
            }
        }

        let configs = sqlx::query_as::<_, VendorConfig>(
            "SELECT id, adapter_id, display_name, services, is_enabled, priority,
                    settings, created_at, updated_at
             FROM vendor_configs
             WHERE is_enabled = TRUE AND $1 = ANY(services)
             ORDER BY priority ASC, adapter_id ASC",
        )
        .bind(service_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        #[cfg(feature = "cache")]
        if let Some(ref cache) = self.cache {
            let key = VendorsKey::new(service_type).to_string();
            if let Err(e) = cache.set(&key, &configs, Some(ttl::VENDOR_CONFIGS)).await {
                debug!("Failed to cache enabled vendors {}: {}", key, e);
            }
        }

        Ok(configs)
    }

    async fn find_by_adapter_id(&self, adapter_id: &str) -> DbResult<Option<VendorConfig>> {
        sqlx::query_as::<_, VendorConfig>(
            "SELECT id, adapter_id, display_name, services, is_enabled, priority,
                    settings, created_at, updated_at
             FROM vendor_configs WHERE adapter_id = $1",
        )
        .bind(adapter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
