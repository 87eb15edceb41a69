use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use vendora_backend::api::{self, AppState};
use vendora_backend::config::Config;
use vendora_backend::database::referral_repository::PgReferralStore;
use vendora_backend::database::repository::VendorConfigStore;
use vendora_backend::database::routing_repository::PgRoutingStore;
use vendora_backend::database::users_repository::PgUserStore;
use vendora_backend::database::vendor_config_repository::PgVendorConfigStore;
use vendora_backend::database::wallet_repository::PgWalletStore;
use vendora_backend::database::{init_pool, PoolConfig};
use vendora_backend::engine::{
    PurchaseOrchestrator, ReconciliationSweep, ReferralEngine, ReferralPolicy, WalletLedger,
};
use vendora_backend::notifications::LogEmitter;
use vendora_backend::vendors::{VendorRegistry, VendorRouter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting Vendora Backend");
    tracing::info!("Environment: {}", config.server.environment);

    // Database pool
    let pool_config = PoolConfig {
        max_connections: config.database.max_connections,
        ..PoolConfig::default()
    };
    let pool = init_pool(&config.database.url, Some(pool_config)).await?;

    // Cache pool; the engine runs without it when Redis is unreachable.
    #[cfg(feature = "cache")]
    let cache_pool = {
        let cache_config = vendora_backend::cache::CacheConfig {
            redis_url: config.redis.url.clone(),
            ..vendora_backend::cache::CacheConfig::default()
        };
        match vendora_backend::cache::init_cache_pool(cache_config).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!("Cache unavailable, continuing without it: {}", e);
                None
            }
        }
    };

    // Stores
    #[cfg(feature = "cache")]
    let (wallet_store, routing_store, vendor_config_store) = match &cache_pool {
        Some(cache) => {
            let cache = vendora_backend::cache::RedisCache::new(cache.clone());
            (
                PgWalletStore::with_cache(pool.clone(), cache.clone()),
                PgRoutingStore::with_cache(pool.clone(), cache.clone()),
                PgVendorConfigStore::with_cache(pool.clone(), cache),
            )
        }
        None => (
            PgWalletStore::new(pool.clone()),
            PgRoutingStore::new(pool.clone()),
            PgVendorConfigStore::new(pool.clone()),
        ),
    };
    #[cfg(not(feature = "cache"))]
    let (wallet_store, routing_store, vendor_config_store) = (
        PgWalletStore::new(pool.clone()),
        PgRoutingStore::new(pool.clone()),
        PgVendorConfigStore::new(pool.clone()),
    );

    let wallet_store = Arc::new(wallet_store);
    let routing_store = Arc::new(routing_store);
    let vendor_config_store = Arc::new(vendor_config_store);
    let referral_store = Arc::new(PgReferralStore::new(pool.clone()));
    let user_store = Arc::new(PgUserStore::new(pool.clone()));

    // Vendor adapters from the stored configs
    let vendor_configs = vendor_config_store.list_all().await?;
    let registry = Arc::new(VendorRegistry::from_configs(&vendor_configs));
    if registry.is_empty() {
        tracing::warn!("No vendor adapters registered; purchases will not dispatch");
    } else {
        tracing::info!("Vendor adapters: {}", registry.ids().join(", "));
    }

    // Engine components
    let vendor_router = Arc::new(VendorRouter::new(
        registry.clone(),
        routing_store,
        vendor_config_store.clone(),
    ));
    let ledger = Arc::new(WalletLedger::new(wallet_store));
    let policy = ReferralPolicy {
        first_purchase_bonus: config.referral.first_purchase_bonus,
        base_rate: config.referral.base_rate,
        boosted_rate: config.referral.boosted_rate,
        boost_threshold: config.referral.boost_threshold,
    };
    let referral = Arc::new(ReferralEngine::new(user_store, referral_store, policy));
    let notifier = Arc::new(LogEmitter);
    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        ledger.clone(),
        vendor_router.clone(),
        referral.clone(),
        notifier.clone(),
        Duration::from_secs(config.engine.vendor_timeout_secs),
    ));

    // Background reconciliation
    let sweep = Arc::new(ReconciliationSweep::new(
        ledger.clone(),
        registry,
        referral.clone(),
        notifier.clone(),
        Duration::from_secs(config.engine.sweep_cutoff_secs),
        config.engine.sweep_batch_size,
    ));
    sweep.spawn(Duration::from_secs(config.engine.sweep_interval_secs));

    // HTTP surface
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        ledger,
        orchestrator,
        referral,
        vendor_router,
        notifier,
        #[cfg(feature = "cache")]
        cache_pool,
    };
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
