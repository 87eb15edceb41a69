use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::model::{LedgerEntry, PurchaseOutcome, PurchaseRequest, ServiceType};
use crate::vendors::types::PlanQuote;

/// Sanitized ledger entry for API responses. Raw vendor payloads and the
/// attempt trail in `details` stay server-side.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub reference: String,
    pub kind: String,
    pub status: String,
    pub amount: Decimal,
    pub service_type: Option<String>,
    pub network: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LedgerEntry> for EntryView {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            reference: entry.reference,
            kind: entry.kind,
            status: entry.status,
            amount: entry.amount,
            service_type: entry.service_type,
            network: entry.network,
            vendor_name: entry.vendor_name,
            vendor_reference: entry.vendor_reference,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

pub async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> AppResult<(StatusCode, Json<PurchaseOutcome>)> {
    let outcome = state.orchestrator.purchase(request).await?;
    let code = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((code, Json(outcome)))
}

pub async fn purchase_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> AppResult<Json<EntryView>> {
    let entry = state
        .ledger
        .entry_by_reference(&reference)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no entry with reference '{}'", reference)))?;
    Ok(Json(EntryView::from(entry)))
}

#[derive(Debug, Deserialize)]
pub struct PlansQuery {
    pub network: String,
}

pub async fn list_plans(
    State(state): State<AppState>,
    Path(service_type): Path<String>,
    Query(query): Query<PlansQuery>,
) -> AppResult<Json<Vec<PlanQuote>>> {
    let service_type = ServiceType::try_from(service_type.as_str()).map_err(AppError::Validation)?;
    let network = query.network.trim().to_lowercase();
    if network.is_empty() {
        return Err(AppError::Validation("network is required".to_string()));
    }
    let plans = state.vendor_router.quote_plans(service_type, &network).await?;
    Ok(Json(plans))
}
