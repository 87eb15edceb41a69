//! HTTP surface
//!
//! Thin axum handlers over the engine components. Handlers validate shape,
//! call one engine operation and serialize the outcome; all policy lives
//! below this layer.

pub mod health;
pub mod purchases;
pub mod referrals;
pub mod wallets;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[cfg(feature = "cache")]
use crate::cache::RedisPool;
use crate::config::Config;
use crate::engine::{PurchaseOrchestrator, ReferralEngine, WalletLedger};
use crate::notifications::NotificationEmitter;
use crate::vendors::VendorRouter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub ledger: Arc<WalletLedger>,
    pub orchestrator: Arc<PurchaseOrchestrator>,
    pub referral: Arc<ReferralEngine>,
    pub vendor_router: Arc<VendorRouter>,
    pub notifier: Arc<dyn NotificationEmitter>,
    #[cfg(feature = "cache")]
    pub cache_pool: Option<RedisPool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/purchases", post(purchases::create_purchase))
        .route(
            "/api/v1/purchases/:reference",
            get(purchases::purchase_status),
        )
        .route(
            "/api/v1/services/:service_type/plans",
            get(purchases::list_plans),
        )
        .route("/api/v1/wallets/:owner_id", get(wallets::get_wallet))
        .route(
            "/api/v1/wallets/funding/callback",
            post(wallets::funding_callback),
        )
        .route(
            "/api/v1/referrals/:referrer_id/earnings",
            get(referrals::list_earnings),
        )
        .route(
            "/api/v1/referrals/:referrer_id/withdrawals",
            post(referrals::withdraw),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}
