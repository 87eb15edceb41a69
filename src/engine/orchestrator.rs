//! Purchase orchestration
//!
//! Drives a purchase through its three phases: reserve the funds, walk the
//! vendor candidates in order, then settle the entry. Every attempt is
//! written ahead of the vendor call so a crash mid-dispatch leaves enough
//! evidence for the reconciliation sweep to finish the job.

use regex::Regex;
use rust_decimal::Decimal;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::ledger::WalletLedger;
use crate::engine::referral::ReferralEngine;
use crate::error::{AppError, AppResult};
use crate::model::{
    DispatchAttempt, EntryDetails, FinalizeMeta, LedgerEntry, NewLedgerEntry, PurchaseOutcome,
    PurchaseRequest, PurchaseStatus, ServiceType,
};
use crate::notifications::{NotificationEmitter, NotificationIntent};
use crate::vendors::traits::VendorAdapter;
use crate::vendors::types::{DispatchOutcome, PurchaseOrder};
use crate::vendors::VendorRouter;

static PHONE_PATTERN: OnceLock<Regex> = OnceLock::new();
static METER_PATTERN: OnceLock<Regex> = OnceLock::new();
static SMARTCARD_PATTERN: OnceLock<Regex> = OnceLock::new();
static REFERENCE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn phone_pattern() -> &'static Regex {
    PHONE_PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\+?234|0)[789][01]\d{8}$").expect("static pattern compiles")
    })
}

fn meter_pattern() -> &'static Regex {
    METER_PATTERN.get_or_init(|| Regex::new(r"^\d{10,13}$").expect("static pattern compiles"))
}

fn smartcard_pattern() -> &'static Regex {
    SMARTCARD_PATTERN.get_or_init(|| Regex::new(r"^\d{8,12}$").expect("static pattern compiles"))
}

fn reference_pattern() -> &'static Regex {
    REFERENCE_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{6,64}$").expect("static pattern compiles"))
}

pub struct PurchaseOrchestrator {
    ledger: Arc<WalletLedger>,
    router: Arc<VendorRouter>,
    referral: Arc<ReferralEngine>,
    notifier: Arc<dyn NotificationEmitter>,
    vendor_timeout: Duration,
}

impl PurchaseOrchestrator {
    pub fn new(
        ledger: Arc<WalletLedger>,
        router: Arc<VendorRouter>,
        referral: Arc<ReferralEngine>,
        notifier: Arc<dyn NotificationEmitter>,
        vendor_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            router,
            referral,
            notifier,
            vendor_timeout,
        }
    }

    /// Run a purchase end to end. A reference seen before short-circuits to
    /// the stored result without touching the balance again.
    pub async fn purchase(self: &Arc<Self>, request: PurchaseRequest) -> AppResult<PurchaseOutcome> {
        let request = validate(request)?;
        let candidates = self
            .router
            .resolve(request.service_type, &request.network)
            .await?;

        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| format!("pur_{}", Uuid::new_v4().simple()));
        let details = EntryDetails::purchase(
            request.service_type,
            &request.network,
            &request.recipient,
            request.vendor_params.clone(),
        );
        let new_entry = NewLedgerEntry::purchase(
            request.owner_id,
            request.selling_price,
            reference.clone(),
            request.service_type,
            request.network.clone(),
            details.to_value(),
        );

        let reserved = self.ledger.reserve(&new_entry).await?;
        if reserved.is_replay() {
            info!("Purchase {} replayed for {}", reference, request.owner_id);
            return Ok(outcome_from_entry(reserved.entry(), true));
        }
        let entry = reserved.entry().clone();
        info!(
            "Reserved {} for purchase {} ({}/{})",
            entry.amount, reference, request.service_type, request.network
        );

        // Dispatch runs detached so it survives the caller hanging up.
        let this = Arc::clone(self);
        let handle =
            tokio::spawn(async move { this.dispatch(entry, details, request, candidates).await });
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AppError::Internal(format!("dispatch task failed: {}", e))),
        }
    }

    async fn dispatch(
        &self,
        entry: LedgerEntry,
        mut details: EntryDetails,
        request: PurchaseRequest,
        candidates: Vec<Arc<dyn VendorAdapter>>,
    ) -> AppResult<PurchaseOutcome> {
        for (index, adapter) in candidates.iter().enumerate() {
            let request_id = format!("{}-{}", entry.reference, index + 1);
            details.push_attempt(DispatchAttempt {
                vendor: adapter.id().to_string(),
                request_id: request_id.clone(),
                started_at: chrono::Utc::now(),
                outcome: None,
                reason: None,
            });
            // The attempt must be durable before the vendor can see it.
            self.ledger.record_attempts(entry.id, &details).await?;

            let order = PurchaseOrder {
                request_id,
                service_type: request.service_type,
                network: request.network.clone(),
                recipient: request.recipient.clone(),
                amount: entry.amount,
                params: request.vendor_params.clone(),
            };

            let dispatched =
                match tokio::time::timeout(self.vendor_timeout, adapter.execute(&order)).await {
                    Ok(outcome) => outcome,
                    Err(_) => DispatchOutcome::Unavailable {
                        reason: format!(
                            "dispatch timed out after {}s",
                            self.vendor_timeout.as_secs()
                        ),
                    },
                };

            details.close_attempt(
                dispatched.attempt_outcome(),
                dispatched.reason().map(String::from),
            );

            match dispatched {
                DispatchOutcome::Delivered {
                    vendor_reference,
                    cost_price,
                    payload: _,
                } => {
                    let meta = FinalizeMeta {
                        vendor_name: adapter.id().to_string(),
                        vendor_reference,
                        cost_price,
                        details: Some(details.to_value()),
                    };
                    let transition = self.ledger.finalize(entry.id, &meta).await?;
                    if transition.was_applied() {
                        self.after_completion(transition.entry()).await;
                    }
                    info!(
                        "Purchase {} completed via {}",
                        entry.reference,
                        adapter.id()
                    );
                    return Ok(outcome_from_entry(transition.entry(), false));
                }
                DispatchOutcome::Rejected { reason } => {
                    if let Err(e) = self.ledger.record_attempts(entry.id, &details).await {
                        warn!(
                            "Could not persist attempt trail for {}: {}",
                            entry.reference, e
                        );
                    }
                    let transition = self.ledger.compensate(entry.id, &reason).await?;
                    if transition.was_applied() {
                        self.notifier
                            .emit(NotificationIntent::purchase_refunded(
                                entry.owner_id,
                                &entry.reference,
                                entry.amount,
                                &reason,
                            ))
                            .await;
                    }
                    warn!(
                        "Purchase {} rejected by {}: {}",
                        entry.reference,
                        adapter.id(),
                        reason
                    );
                    return Err(AppError::VendorRejected {
                        vendor: adapter.id().to_string(),
                        reason,
                    });
                }
                DispatchOutcome::Unavailable { reason } => {
                    if let Err(e) = self.ledger.record_attempts(entry.id, &details).await {
                        warn!(
                            "Could not persist attempt trail for {}: {}",
                            entry.reference, e
                        );
                    }
                    warn!(
                        "Vendor '{}' unavailable for {}: {}",
                        adapter.id(),
                        entry.reference,
                        reason
                    );
                }
            }
        }

        // Every vendor was unavailable. The hold stays in place and the
        // reconciliation sweep decides between completion and reversal.
        warn!(
            "Purchase {} exhausted all vendors; left pending for reconciliation",
            entry.reference
        );
        Ok(PurchaseOutcome {
            status: PurchaseStatus::PendingReconciliation,
            entry_id: entry.id,
            reference: entry.reference.clone(),
            vendor_name: None,
            vendor_reference: None,
            message: Some("your order is processing and will be confirmed shortly".to_string()),
            replayed: false,
        })
    }

    async fn after_completion(&self, entry: &LedgerEntry) {
        match self.referral.on_purchase_completed(entry).await {
            Ok(Some(earning)) => {
                self.notifier
                    .emit(NotificationIntent::referral_earning(
                        earning.referrer_id,
                        earning.amount,
                    ))
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!("Referral hook failed for {}: {}", entry.reference, e),
        }
        self.notifier
            .emit(NotificationIntent::purchase_completed(
                entry.owner_id,
                &entry.reference,
                entry.service_type.as_deref().unwrap_or("purchase"),
                entry.amount,
            ))
            .await;
    }
}

fn validate(mut request: PurchaseRequest) -> AppResult<PurchaseRequest> {
    request.network = request.network.trim().to_lowercase();
    request.recipient = request.recipient.trim().to_string();

    if request.network.is_empty() {
        return Err(AppError::Validation("network is required".to_string()));
    }
    if request.selling_price <= Decimal::ZERO {
        return Err(AppError::Validation(
            "selling_price must be greater than zero".to_string(),
        ));
    }
    if let Some(reference) = &request.reference {
        if !reference_pattern().is_match(reference) {
            return Err(AppError::Validation(
                "reference must be 6-64 characters of letters, digits, '-' or '_'".to_string(),
            ));
        }
    }

    match request.service_type {
        ServiceType::Data | ServiceType::Airtime => {
            if !phone_pattern().is_match(&request.recipient) {
                return Err(AppError::Validation(
                    "recipient must be a valid Nigerian phone number".to_string(),
                ));
            }
        }
        ServiceType::Cable => {
            if !smartcard_pattern().is_match(&request.recipient) {
                return Err(AppError::Validation(
                    "recipient must be a smartcard number of 8 to 12 digits".to_string(),
                ));
            }
        }
        ServiceType::Electricity => {
            if !meter_pattern().is_match(&request.recipient) {
                return Err(AppError::Validation(
                    "recipient must be a meter number of 10 to 13 digits".to_string(),
                ));
            }
        }
    }

    match request.service_type {
        ServiceType::Data | ServiceType::Cable => {
            let has_plan = request
                .vendor_params
                .get("plan_code")
                .and_then(|v| v.as_str())
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !has_plan {
                return Err(AppError::Validation(format!(
                    "{} purchases require vendor_params.plan_code",
                    request.service_type
                )));
            }
        }
        ServiceType::Electricity => {
            let meter_type = request
                .vendor_params
                .get("meter_type")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !matches!(meter_type, "prepaid" | "postpaid") {
                return Err(AppError::Validation(
                    "electricity purchases require vendor_params.meter_type of 'prepaid' or 'postpaid'"
                        .to_string(),
                ));
            }
        }
        ServiceType::Airtime => {}
    }

    Ok(request)
}

fn outcome_from_entry(entry: &LedgerEntry, replayed: bool) -> PurchaseOutcome {
    let status = match entry.status.as_str() {
        "completed" => PurchaseStatus::Completed,
        "failed" | "reversed" => PurchaseStatus::Refunded,
        _ => PurchaseStatus::PendingReconciliation,
    };
    let message = match status {
        PurchaseStatus::Completed => None,
        PurchaseStatus::Refunded => entry
            .details
            .as_ref()
            .and_then(|d| d.get("failure_reason"))
            .and_then(|v| v.as_str())
            .map(String::from),
        PurchaseStatus::PendingReconciliation => {
            Some("your order is processing and will be confirmed shortly".to_string())
        }
    };
    PurchaseOutcome {
        status,
        entry_id: entry.id,
        reference: entry.reference.clone(),
        vendor_name: entry.vendor_name.clone(),
        vendor_reference: entry.vendor_reference.clone(),
        message,
        replayed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_request(service_type: ServiceType, recipient: &str) -> PurchaseRequest {
        PurchaseRequest {
            owner_id: Uuid::new_v4(),
            service_type,
            network: "MTN".to_string(),
            recipient: recipient.to_string(),
            vendor_params: serde_json::json!({ "plan_code": "D-1GB" }),
            selling_price: dec!(500),
            reference: None,
        }
    }

    #[test]
    fn network_is_normalized_to_lowercase() {
        let valid = validate(base_request(ServiceType::Data, "08031234567")).unwrap();
        assert_eq!(valid.network, "mtn");
    }

    #[test]
    fn phone_numbers_accept_country_code_forms() {
        for recipient in ["08031234567", "2348031234567", "+2347012345678", "09112345678"] {
            assert!(
                validate(base_request(ServiceType::Airtime, recipient)).is_ok(),
                "{} should validate",
                recipient
            );
        }
        for recipient in ["0503123456", "803123456", "08031234", "not-a-phone"] {
            assert!(
                validate(base_request(ServiceType::Airtime, recipient)).is_err(),
                "{} should fail",
                recipient
            );
        }
    }

    #[test]
    fn data_requires_plan_code() {
        let mut request = base_request(ServiceType::Data, "08031234567");
        request.vendor_params = serde_json::json!({});
        assert!(validate(request).is_err());
    }

    #[test]
    fn cable_checks_smartcard_shape() {
        let mut request = base_request(ServiceType::Cable, "12345678901");
        request.network = "dstv".to_string();
        assert!(validate(request).is_ok());

        let mut short = base_request(ServiceType::Cable, "1234");
        short.network = "dstv".to_string();
        assert!(validate(short).is_err());
    }

    #[test]
    fn electricity_requires_meter_type() {
        let mut request = base_request(ServiceType::Electricity, "04123456789");
        request.network = "ikeja-electric".to_string();
        request.vendor_params = serde_json::json!({ "meter_type": "prepaid" });
        assert!(validate(request).is_ok());

        let mut bad = base_request(ServiceType::Electricity, "04123456789");
        bad.network = "ikeja-electric".to_string();
        bad.vendor_params = serde_json::json!({ "meter_type": "smart" });
        assert!(validate(bad).is_err());
    }

    #[test]
    fn caller_reference_shape_is_enforced() {
        let mut request = base_request(ServiceType::Data, "08031234567");
        request.reference = Some("my-ref_01".to_string());
        assert!(validate(request.clone()).is_ok());

        request.reference = Some("ab".to_string());
        assert!(validate(request.clone()).is_err());

        request.reference = Some("bad reference!".to_string());
        assert!(validate(request).is_err());
    }

    #[test]
    fn zero_price_fails_validation() {
        let mut request = base_request(ServiceType::Data, "08031234567");
        request.selling_price = Decimal::ZERO;
        assert!(validate(request).is_err());
    }

    #[test]
    fn entry_status_maps_to_purchase_status() {
        let mut entry = LedgerEntry {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            kind: "purchase".to_string(),
            status: "completed".to_string(),
            amount: dec!(500),
            reference: "pur_map".to_string(),
            service_type: Some("data".to_string()),
            network: Some("mtn".to_string()),
            vendor_name: Some("vtpass".to_string()),
            vendor_reference: None,
            cost_price: None,
            selling_price: Some(dec!(500)),
            profit: None,
            details: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(
            outcome_from_entry(&entry, true).status,
            PurchaseStatus::Completed
        );

        entry.status = "failed".to_string();
        entry.details = Some(serde_json::json!({ "failure_reason": "vendor said no" }));
        let outcome = outcome_from_entry(&entry, true);
        assert_eq!(outcome.status, PurchaseStatus::Refunded);
        assert_eq!(outcome.message.as_deref(), Some("vendor said no"));

        entry.status = "pending".to_string();
        assert_eq!(
            outcome_from_entry(&entry, true).status,
            PurchaseStatus::PendingReconciliation
        );
    }
}
