use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::RoutingStore;
use crate::model::{ServiceRoute, ServiceType};

#[cfg(feature = "cache")]
use crate::cache::{cache::ttl, keys::routing::RouteKey, Cache, RedisCache};
#[cfg(feature = "cache")]
use tracing::debug;

/// Postgres-backed route store. Routes change rarely, so lookups are cached
/// aggressively; a stale route only reorders vendors, it never charges twice.
pub struct PgRoutingStore {
    pool: PgPool,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
}

impl PgRoutingStore {
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
impl RoutingStore for PgRoutingStore {
    async fn find_route(
        &self,
        service_type: ServiceType,
        network: &str,
    ) -> DbResult<Option<ServiceRoute>> {
        #[cfg(feature = "cache")]
        if let Some(ref cache) = self.cache {
            let key = RouteKey::new(service_type, network).to_string();
            if let Ok(Some(cached)) = <RedisCache as Cache<ServiceRoute>>::get(cache, &key).await
            {
                debug!("Cache hit for route: {}", key);
                return Ok(Some(cached));
            }
        }

        let route = sqlx::query_as::<_, ServiceRoute>(
            "SELECT id, service_type, network, vendors, updated_at
             FROM service_routes WHERE service_type = $1 AND network = $2",
        )
        .bind(service_type.as_str())
        .bind(network)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        #[cfg(feature = "cache")]
        if let (Some(ref cache), Some(ref found)) = (&self.cache, &route) {
            let key = RouteKey::new(service_type, network).to_string();
            if let Err(e) = cache.set(&key, found, Some(ttl::VENDOR_ROUTES)).await {
                debug!("Failed to cache route {}: {}", key, e);
            }
        }

        Ok(route)
    }
}
