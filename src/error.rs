//! Application error taxonomy.
//!
//! Request-scoped failures map onto HTTP responses through `IntoResponse`.
//! Per-attempt vendor unavailability is deliberately NOT represented here:
//! it lives in `vendors::types::DispatchOutcome` and is swallowed by the
//! orchestrator to drive fallback. Only terminal outcomes surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error as log_error;

use crate::database::error::DatabaseError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request, rejected before any funds are touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Balance below the requested debit. No funds moved.
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: String, required: String },

    /// Routing produced an empty candidate list. No funds moved.
    #[error("no vendor available for {service_type} on {network}")]
    NoVendorAvailable {
        service_type: String,
        network: String,
    },

    /// A vendor explicitly declined the order; the reservation was refunded.
    #[error("{vendor} rejected the order: {reason}")]
    VendorRejected { vendor: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    /// Invalid lifecycle transition or conflicting concurrent change.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::InsufficientFunds { .. } => {
                (StatusCode::PAYMENT_REQUIRED, "insufficient_funds")
            }
            AppError::NoVendorAvailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "no_vendor_available")
            }
            AppError::VendorRejected { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "vendor_rejected")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Database(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal detail is logged, never sent to the caller.
        let message = match &self {
            AppError::Database(e) => {
                log_error!("database error surfaced to handler: {}", e);
                "an internal error occurred".to_string()
            }
            AppError::Internal(e) => {
                log_error!("internal error surfaced to handler: {}", e);
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        let cases = [
            (
                AppError::Validation("bad phone".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::InsufficientFunds {
                    available: "100".to_string(),
                    required: "500".to_string(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                AppError::NoVendorAvailable {
                    service_type: "data".to_string(),
                    network: "mtn".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::VendorRejected {
                    vendor: "vtpass".to_string(),
                    reason: "invalid meter".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::NotFound("wallet".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Unauthorized("bad signature".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_and_code().0, expected);
        }
    }

    #[test]
    fn vendor_rejection_keeps_reason_visible() {
        let error = AppError::VendorRejected {
            vendor: "clubkonnect".to_string(),
            reason: "invalid recipient".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "clubkonnect rejected the order: invalid recipient"
        );
    }
}
