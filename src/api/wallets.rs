use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::purchases::EntryView;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::model::{EntryDetails, LedgerKind, NewLedgerEntry};
use crate::notifications::NotificationIntent;

pub const FUNDING_SIGNATURE_HEADER: &str = "x-funding-signature";

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub owner_id: Uuid,
    pub balance: Decimal,
    pub recent_entries: Vec<EntryView>,
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> AppResult<Json<WalletView>> {
    let wallet = state.ledger.wallet(owner_id).await?;
    let entries = state.ledger.history(owner_id, 20, 0).await?;
    Ok(Json(WalletView {
        owner_id,
        balance: wallet.balance,
        recent_entries: entries.into_iter().map(EntryView::from).collect(),
    }))
}

/// Gateway webhook payload for wallet funding. The gateway reports amounts
/// in minor units (kobo) and carries our user id in the metadata it echoes
/// back.
#[derive(Debug, Deserialize)]
struct FundingEvent {
    event: String,
    data: FundingData,
}

#[derive(Debug, Deserialize)]
struct FundingData {
    reference: String,
    amount: i64,
    #[serde(default)]
    channel: Option<String>,
    metadata: FundingMetadata,
}

#[derive(Debug, Deserialize)]
struct FundingMetadata {
    user_id: Uuid,
}

pub async fn funding_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let signature = headers
        .get(FUNDING_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing funding signature header".to_string()))?;
    if !verify_signature(
        state.config.funding.webhook_secret.as_bytes(),
        &body,
        signature,
    ) {
        warn!("Funding callback with invalid signature rejected");
        return Err(AppError::Unauthorized(
            "invalid funding signature".to_string(),
        ));
    }

    let event: FundingEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("unreadable funding event: {}", e)))?;

    if event.event != "charge.success" {
        info!("Ignoring funding event '{}'", event.event);
        return Ok(Json(json!({ "status": "ignored" })));
    }

    let data = event.data;
    if data.amount <= 0 {
        return Err(AppError::Validation(
            "funding amount must be positive".to_string(),
        ));
    }
    let amount = Decimal::new(data.amount, 2);

    let details = EntryDetails::funding("paystack", &data.reference, data.channel.clone());
    let entry = NewLedgerEntry::credit(
        data.metadata.user_id,
        LedgerKind::WalletFunding,
        amount,
        format!("fund_{}", data.reference),
        details.to_value(),
    );

    let outcome = state.ledger.credit(&entry).await?;
    if outcome.is_replay() {
        info!("Duplicate funding callback for {}", data.reference);
        return Ok(Json(json!({ "status": "duplicate" })));
    }

    info!(
        "Wallet {} funded with {} via {}",
        data.metadata.user_id, amount, data.reference
    );
    state
        .notifier
        .emit(NotificationIntent::wallet_funded(
            data.metadata.user_id,
            &outcome.entry().reference,
            amount,
        ))
        .await;
    Ok(Json(json!({ "status": "credited" })))
}

fn verify_signature(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;

    let mut mac = HmacSha512::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    let computed_signature = hex::encode(mac.finalize().into_bytes());

    let provided_signature = signature.trim();

    // Constant-time comparison to prevent timing attacks
    if computed_signature.len() != provided_signature.len() {
        return false;
    }

    computed_signature
        .as_bytes()
        .iter()
        .zip(provided_signature.as_bytes().iter())
        .fold(0, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], payload: &[u8]) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        let mut mac =
            Hmac::<Sha512>::new_from_slice(secret).expect("HMAC can take key of any size");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let secret = b"webhook-secret";
        let payload = br#"{"event":"charge.success"}"#;
        let signature = sign(secret, payload);
        assert!(verify_signature(secret, payload, &signature));
    }

    #[test]
    fn tampered_payload_fails() {
        let secret = b"webhook-secret";
        let signature = sign(secret, br#"{"event":"charge.success"}"#);
        assert!(!verify_signature(
            secret,
            br#"{"event":"charge.failed"}"#,
            &signature
        ));
    }

    #[test]
    fn malformed_signature_fails() {
        assert!(!verify_signature(b"secret", b"payload", "not-hex"));
    }

    #[test]
    fn funding_event_parses_minor_units() {
        let raw = r#"{
            "event": "charge.success",
            "data": {
                "reference": "psk_8f3a",
                "amount": 500000,
                "channel": "card",
                "metadata": { "user_id": "5f0f2c4e-7f2a-4b3c-9a1d-2e6f8a9b0c1d" }
            }
        }"#;
        let event: FundingEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "charge.success");
        assert_eq!(Decimal::new(event.data.amount, 2).to_string(), "5000.00");
    }
}
