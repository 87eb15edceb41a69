use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::database;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
}

#[derive(Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Up,
    Down,
    Disabled,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database = match database::health_check(&state.pool).await {
        Ok(()) => ComponentHealth::Up,
        Err(_) => ComponentHealth::Down,
    };

    #[cfg(feature = "cache")]
    let cache = match &state.cache_pool {
        Some(pool) => match crate::cache::health_check(pool).await {
            Ok(()) => ComponentHealth::Up,
            Err(_) => ComponentHealth::Down,
        },
        None => ComponentHealth::Disabled,
    };
    #[cfg(not(feature = "cache"))]
    let cache = ComponentHealth::Disabled;

    // The cache degrades gracefully, so only the database gates health.
    let status = if database == ComponentHealth::Up {
        "healthy"
    } else {
        "degraded"
    };

    let response = HealthResponse {
        status: status.to_string(),
        version,
        environment: state.config.server.environment.clone(),
        database,
        cache,
    };

    Ok(Json(response))
}
