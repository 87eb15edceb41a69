//! Shared types for vendor dispatch and verification.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AttemptOutcome, ServiceType};

/// One fulfillment order handed to a vendor adapter.
///
/// `request_id` is unique per attempt, not per purchase, so a requery can
/// always tell which vendor call it is asking about.
#[derive(Debug, Clone)]
pub struct PurchaseOrder {
    pub request_id: String,
    pub service_type: ServiceType,
    pub network: String,
    pub recipient: String,
    pub amount: Decimal,
    /// Service-specific fields such as `plan_code` or `meter_type`.
    pub params: Value,
}

impl PurchaseOrder {
    /// Read a string field out of the vendor params.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Classified result of a single dispatch attempt.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The vendor accepted the order and owns fulfillment from here.
    Delivered {
        vendor_reference: Option<String>,
        cost_price: Option<Decimal>,
        payload: Option<Value>,
    },
    /// The vendor understood the order and said no. Permanent; trying
    /// another vendor with the same order would fail the same way.
    Rejected { reason: String },
    /// The vendor could not be reached or could not serve right now.
    /// The next vendor in the route may still succeed.
    Unavailable { reason: String },
}

impl DispatchOutcome {
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            DispatchOutcome::Delivered { .. } => AttemptOutcome::Delivered,
            DispatchOutcome::Rejected { .. } => AttemptOutcome::Rejected,
            DispatchOutcome::Unavailable { .. } => AttemptOutcome::Unavailable,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Rejected { reason } | DispatchOutcome::Unavailable { reason } => {
                Some(reason)
            }
            DispatchOutcome::Delivered { .. } => None,
        }
    }
}

/// What a vendor knows about a past attempt, as reported by requery.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// The vendor fulfilled this attempt.
    Confirmed { vendor_reference: Option<String> },
    /// The vendor is certain the attempt did not and will not fulfil.
    Failed { reason: String },
    /// No definitive answer; do not move funds on this.
    Unknown,
}

/// A purchasable plan offered by a vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanQuote {
    pub plan_code: String,
    pub name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub validity: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_attempt_record() {
        let delivered = DispatchOutcome::Delivered {
            vendor_reference: Some("VT-1".to_string()),
            cost_price: None,
            payload: None,
        };
        assert_eq!(delivered.attempt_outcome(), AttemptOutcome::Delivered);
        assert!(delivered.reason().is_none());

        let rejected = DispatchOutcome::Rejected {
            reason: "invalid plan".to_string(),
        };
        assert_eq!(rejected.attempt_outcome(), AttemptOutcome::Rejected);
        assert_eq!(rejected.reason(), Some("invalid plan"));
    }
}
