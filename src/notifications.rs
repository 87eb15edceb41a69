//! Notification intents
//!
//! The engine does not talk to push or mail providers directly; it emits an
//! intent describing what the user should be told and lets the emitter
//! implementation decide delivery. The default emitter just logs.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PurchaseCompleted,
    PurchaseRefunded,
    WalletFunded,
    ReferralEarning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub target_user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl NotificationIntent {
    pub fn purchase_completed(
        target_user_id: Uuid,
        reference: &str,
        service_type: &str,
        amount: Decimal,
    ) -> Self {
        Self {
            target_user_id,
            kind: NotificationKind::PurchaseCompleted,
            title: "Purchase successful".to_string(),
            body: format!("Your {} purchase of NGN {} was successful.", service_type, amount),
            data: json!({ "reference": reference, "service_type": service_type }),
        }
    }

    pub fn purchase_refunded(
        target_user_id: Uuid,
        reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> Self {
        Self {
            target_user_id,
            kind: NotificationKind::PurchaseRefunded,
            title: "Purchase refunded".to_string(),
            body: format!(
                "Your purchase could not be completed and NGN {} was returned to your wallet.",
                amount
            ),
            data: json!({ "reference": reference, "reason": reason }),
        }
    }

    pub fn wallet_funded(target_user_id: Uuid, reference: &str, amount: Decimal) -> Self {
        Self {
            target_user_id,
            kind: NotificationKind::WalletFunded,
            title: "Wallet funded".to_string(),
            body: format!("NGN {} has been added to your wallet.", amount),
            data: json!({ "reference": reference }),
        }
    }

    pub fn referral_earning(target_user_id: Uuid, amount: Decimal) -> Self {
        Self {
            target_user_id,
            kind: NotificationKind::ReferralEarning,
            title: "Referral bonus earned".to_string(),
            body: format!("You earned NGN {} from a referral purchase.", amount),
            data: json!({}),
        }
    }
}

#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    /// Delivery is best-effort; emitters must not fail the flow that
    /// produced the intent.
    async fn emit(&self, intent: NotificationIntent);
}

/// Emitter that writes intents to the log stream.
pub struct LogEmitter;

#[async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, intent: NotificationIntent) {
        info!(
            "Notification for {}: [{:?}] {} - {}",
            intent.target_user_id, intent.kind, intent.title, intent.body
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_completed_carries_reference() {
        let user = Uuid::new_v4();
        let intent =
            NotificationIntent::purchase_completed(user, "pur_abc", "data", Decimal::new(500, 0));
        assert_eq!(intent.kind, NotificationKind::PurchaseCompleted);
        assert_eq!(intent.data["reference"], "pur_abc");
        assert!(intent.body.contains("500"));
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let kind = serde_json::to_string(&NotificationKind::WalletFunded).unwrap();
        assert_eq!(kind, "\"wallet_funded\"");
    }
}
