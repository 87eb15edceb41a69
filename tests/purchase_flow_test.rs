//! End-to-end purchase flow tests against the in-memory store.
//!
//! These exercise the full reserve -> dispatch -> settle saga with scripted
//! vendor adapters, so every money-movement rule is checked without a
//! database or a live vendor API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use vendora_backend::database::memory::MemoryStore;
use vendora_backend::database::repository::WalletStore;
use vendora_backend::engine::{
    PurchaseOrchestrator, ReconciliationSweep, ReferralEngine, ReferralPolicy, WalletLedger,
};
use vendora_backend::error::{AppError, AppResult};
use vendora_backend::model::{
    AttemptOutcome, EntryDetails, LedgerKind, NewLedgerEntry, PurchaseRequest, PurchaseStatus,
    ServiceType, User, VendorConfig,
};
use vendora_backend::notifications::{NotificationEmitter, NotificationIntent, NotificationKind};
use vendora_backend::vendors::types::{DispatchOutcome, PlanQuote, PurchaseOrder, VerifyOutcome};
use vendora_backend::vendors::{VendorAdapter, VendorRegistry, VendorRouter};

/// Adapter that replays a scripted list of dispatch outcomes and counts
/// how often it was called.
struct ScriptedAdapter {
    id: String,
    script: Mutex<VecDeque<DispatchOutcome>>,
    calls: AtomicUsize,
    verify_outcome: VerifyOutcome,
}

impl ScriptedAdapter {
    fn new(id: &str, script: Vec<DispatchOutcome>) -> Arc<Self> {
        Self::with_verify(id, script, VerifyOutcome::Unknown)
    }

    fn with_verify(
        id: &str,
        script: Vec<DispatchOutcome>,
        verify_outcome: VerifyOutcome,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            verify_outcome,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports(&self, _: ServiceType) -> bool {
        true
    }

    async fn quote(&self, _: ServiceType, _: &str) -> AppResult<Vec<PlanQuote>> {
        Ok(Vec::new())
    }

    async fn execute(&self, _: &PurchaseOrder) -> DispatchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DispatchOutcome::Unavailable {
                reason: "script exhausted".to_string(),
            })
    }

    async fn verify(&self, _: &str) -> VerifyOutcome {
        self.verify_outcome.clone()
    }
}

/// Emitter that records every intent for later assertions.
#[derive(Default)]
struct RecordingEmitter {
    sent: Mutex<Vec<NotificationIntent>>,
}

impl RecordingEmitter {
    fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|intent| intent.kind == kind)
            .count()
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn emit(&self, intent: NotificationIntent) {
        self.sent.lock().unwrap().push(intent);
    }
}

struct Harness {
    store: MemoryStore,
    ledger: Arc<WalletLedger>,
    orchestrator: Arc<PurchaseOrchestrator>,
    sweep: Arc<ReconciliationSweep>,
    referral: Arc<ReferralEngine>,
    emitter: Arc<RecordingEmitter>,
}

fn zero_policy() -> ReferralPolicy {
    ReferralPolicy {
        first_purchase_bonus: dec!(0),
        base_rate: dec!(0),
        boosted_rate: dec!(0),
        boost_threshold: dec!(1),
    }
}

fn vendor_config(adapter_id: &str, priority: i32) -> VendorConfig {
    VendorConfig {
        id: Uuid::new_v4(),
        adapter_id: adapter_id.to_string(),
        display_name: adapter_id.to_string(),
        services: ServiceType::ALL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        is_enabled: true,
        priority,
        settings: json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn engine_with(adapters: &[Arc<ScriptedAdapter>]) -> Harness {
    engine_with_policy(adapters, zero_policy()).await
}

async fn engine_with_policy(
    adapters: &[Arc<ScriptedAdapter>],
    policy: ReferralPolicy,
) -> Harness {
    let store = MemoryStore::new();
    let mut registry = VendorRegistry::new();
    for (index, adapter) in adapters.iter().enumerate() {
        store
            .add_vendor_config(vendor_config(adapter.id(), index as i32 + 1))
            .await;
        registry.register(adapter.clone());
    }
    let registry = Arc::new(registry);

    let router = Arc::new(VendorRouter::new(
        registry.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let ledger = Arc::new(WalletLedger::new(Arc::new(store.clone())));
    let referral = Arc::new(ReferralEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        policy,
    ));
    let emitter = Arc::new(RecordingEmitter::default());
    let notifier: Arc<dyn NotificationEmitter> = emitter.clone();

    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        ledger.clone(),
        router,
        referral.clone(),
        notifier.clone(),
        Duration::from_secs(5),
    ));
    let sweep = Arc::new(ReconciliationSweep::new(
        ledger.clone(),
        registry,
        referral.clone(),
        notifier,
        Duration::ZERO,
        50,
    ));

    Harness {
        store,
        ledger,
        orchestrator,
        sweep,
        referral,
        emitter,
    }
}

fn data_request(owner: Uuid, price: Decimal) -> PurchaseRequest {
    PurchaseRequest {
        owner_id: owner,
        service_type: ServiceType::Data,
        network: "mtn".to_string(),
        recipient: "08031234567".to_string(),
        vendor_params: json!({ "plan_code": "D-1GB" }),
        selling_price: price,
        reference: None,
    }
}

fn delivered(reference: &str, cost: Decimal) -> DispatchOutcome {
    DispatchOutcome::Delivered {
        vendor_reference: Some(reference.to_string()),
        cost_price: Some(cost),
        payload: None,
    }
}

fn unavailable(reason: &str) -> DispatchOutcome {
    DispatchOutcome::Unavailable {
        reason: reason.to_string(),
    }
}

fn rejected(reason: &str) -> DispatchOutcome {
    DispatchOutcome::Rejected {
        reason: reason.to_string(),
    }
}

#[tokio::test]
async fn completed_purchase_debits_once_and_notifies() {
    let vendor = ScriptedAdapter::new("alpha", vec![delivered("A-1", dec!(480))]);
    let h = engine_with(&[vendor.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let outcome = h
        .orchestrator
        .purchase(data_request(owner, dec!(500)))
        .await
        .unwrap();

    assert_eq!(outcome.status, PurchaseStatus::Completed);
    assert!(!outcome.replayed);
    assert_eq!(outcome.vendor_name.as_deref(), Some("alpha"));
    assert_eq!(outcome.vendor_reference.as_deref(), Some("A-1"));
    assert_eq!(vendor.calls(), 1);

    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(500));

    let entry = h.store.find_entry(outcome.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "completed");
    assert_eq!(entry.cost_price, Some(dec!(480)));
    assert_eq!(entry.profit, Some(dec!(20)));
    assert_eq!(h.emitter.count_of(NotificationKind::PurchaseCompleted), 1);
}

#[tokio::test]
async fn replayed_reference_returns_stored_outcome() {
    let vendor = ScriptedAdapter::new("alpha", vec![delivered("A-1", dec!(480))]);
    let h = engine_with(&[vendor.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let mut request = data_request(owner, dec!(500));
    request.reference = Some("pur_replay01".to_string());

    let first = h.orchestrator.purchase(request.clone()).await.unwrap();
    assert!(!first.replayed);
    assert_eq!(first.status, PurchaseStatus::Completed);

    let second = h.orchestrator.purchase(request).await.unwrap();
    assert!(second.replayed);
    assert_eq!(second.status, PurchaseStatus::Completed);
    assert_eq!(second.entry_id, first.entry_id);

    // The vendor saw exactly one order and the wallet paid exactly once.
    assert_eq!(vendor.calls(), 1);
    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(500));
}

#[tokio::test]
async fn unavailable_vendor_falls_through_to_the_next() {
    let flaky = ScriptedAdapter::new("flaky", vec![unavailable("connect timeout")]);
    let steady = ScriptedAdapter::new("steady", vec![delivered("S-77", dec!(470))]);
    let h = engine_with(&[flaky.clone(), steady.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let outcome = h
        .orchestrator
        .purchase(data_request(owner, dec!(500)))
        .await
        .unwrap();

    assert_eq!(outcome.status, PurchaseStatus::Completed);
    assert_eq!(outcome.vendor_name.as_deref(), Some("steady"));
    assert_eq!(flaky.calls(), 1);
    assert_eq!(steady.calls(), 1);

    // The attempt trail names both vendors with per-attempt request ids.
    let entry = h.store.find_entry(outcome.entry_id).await.unwrap().unwrap();
    let details = EntryDetails::from_entry(&entry).unwrap();
    let attempts = details.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].vendor, "flaky");
    assert_eq!(attempts[0].request_id, format!("{}-1", entry.reference));
    assert_eq!(attempts[0].outcome, Some(AttemptOutcome::Unavailable));
    assert_eq!(attempts[1].vendor, "steady");
    assert_eq!(attempts[1].request_id, format!("{}-2", entry.reference));
    assert_eq!(attempts[1].outcome, Some(AttemptOutcome::Delivered));
}

#[tokio::test]
async fn rejection_refunds_and_stops_the_route() {
    let judge = ScriptedAdapter::new("judge", vec![rejected("INVALID_DATAPLAN")]);
    let fallback = ScriptedAdapter::new("fallback", vec![delivered("F-1", dec!(480))]);
    let h = engine_with(&[judge.clone(), fallback.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let err = h
        .orchestrator
        .purchase(data_request(owner, dec!(500)))
        .await
        .unwrap_err();
    match err {
        AppError::VendorRejected { vendor, reason } => {
            assert_eq!(vendor, "judge");
            assert_eq!(reason, "INVALID_DATAPLAN");
        }
        other => panic!("expected VendorRejected, got {:?}", other),
    }

    // A permanent rejection never reaches the next vendor.
    assert_eq!(fallback.calls(), 0);

    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(1000));
    assert_eq!(h.emitter.count_of(NotificationKind::PurchaseRefunded), 1);
}

#[tokio::test]
async fn exhausted_route_leaves_funds_reserved() {
    let first = ScriptedAdapter::new("first", vec![unavailable("503")]);
    let second = ScriptedAdapter::new("second", vec![unavailable("read timeout")]);
    let h = engine_with(&[first.clone(), second.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let outcome = h
        .orchestrator
        .purchase(data_request(owner, dec!(400)))
        .await
        .unwrap();

    assert_eq!(outcome.status, PurchaseStatus::PendingReconciliation);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);

    // The hold stays in place until the sweep decides.
    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(600));
    let entry = h.store.find_entry(outcome.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "pending");
    assert_eq!(h.emitter.count_of(NotificationKind::PurchaseRefunded), 0);
}

#[tokio::test]
async fn insufficient_funds_rejects_before_dispatch() {
    let vendor = ScriptedAdapter::new("alpha", vec![delivered("A-1", dec!(480))]);
    let h = engine_with(&[vendor.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(100)).await;

    let mut request = data_request(owner, dec!(500));
    request.reference = Some("pur_nofunds1".to_string());
    let err = h.orchestrator.purchase(request).await.unwrap_err();
    match err {
        AppError::InsufficientFunds {
            available,
            required,
        } => {
            assert_eq!(available, "100");
            assert_eq!(required, "500");
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    assert_eq!(vendor.calls(), 0);
    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(100));
    let entry = h
        .store
        .find_entry_by_reference("pur_nofunds1")
        .await
        .unwrap();
    assert!(entry.is_none());
}

#[tokio::test]
async fn concurrent_purchases_never_overspend() {
    let script: Vec<DispatchOutcome> = (0..10)
        .map(|i| delivered(&format!("A-{}", i), dec!(140)))
        .collect();
    let vendor = ScriptedAdapter::new("alpha", script);
    let h = engine_with(&[vendor.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let orchestrator = h.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.purchase(data_request(owner, dec!(150))).await
        }));
    }

    let mut completed = 0usize;
    let mut declined = 0usize;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.status, PurchaseStatus::Completed);
                completed += 1;
            }
            Err(AppError::InsufficientFunds { .. }) => declined += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    // 1000 covers exactly six purchases of 150.
    assert_eq!(completed, 6);
    assert_eq!(declined, 4);
    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(100));
}

#[tokio::test]
async fn timed_out_delivery_is_completed_by_the_sweep() {
    let vendor = ScriptedAdapter::with_verify(
        "alpha",
        vec![unavailable("read timeout")],
        VerifyOutcome::Confirmed {
            vendor_reference: Some("A-9".to_string()),
        },
    );
    let h = engine_with(&[vendor.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let outcome = h
        .orchestrator
        .purchase(data_request(owner, dec!(500)))
        .await
        .unwrap();
    assert_eq!(outcome.status, PurchaseStatus::PendingReconciliation);

    let report = h.sweep.run_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.completed, 1);

    let entry = h.store.find_entry(outcome.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "completed");
    assert_eq!(entry.vendor_name.as_deref(), Some("alpha"));
    assert_eq!(entry.vendor_reference.as_deref(), Some("A-9"));

    // The purchase actually went through, so the debit stands.
    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(500));
    assert_eq!(h.emitter.count_of(NotificationKind::PurchaseCompleted), 1);
}

#[tokio::test]
async fn proven_vendor_failure_is_reversed_by_the_sweep() {
    let vendor = ScriptedAdapter::with_verify(
        "alpha",
        vec![unavailable("read timeout")],
        VerifyOutcome::Failed {
            reason: "ORDER_FAILED".to_string(),
        },
    );
    let h = engine_with(&[vendor.clone()]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(1000)).await;

    let outcome = h
        .orchestrator
        .purchase(data_request(owner, dec!(500)))
        .await
        .unwrap();
    assert_eq!(outcome.status, PurchaseStatus::PendingReconciliation);

    let report = h.sweep.run_once().await.unwrap();
    assert_eq!(report.reversed, 1);

    let entry = h.store.find_entry(outcome.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "reversed");
    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(1000));
    assert_eq!(h.emitter.count_of(NotificationKind::PurchaseRefunded), 1);
}

#[tokio::test]
async fn referral_commission_is_paid_once_and_withdrawn_once() {
    let vendor = ScriptedAdapter::new(
        "alpha",
        vec![delivered("A-1", dec!(950)), delivered("A-2", dec!(950))],
    );
    let policy = ReferralPolicy {
        first_purchase_bonus: dec!(50),
        base_rate: dec!(0.02),
        boosted_rate: dec!(0.05),
        boost_threshold: dec!(5000),
    };
    let h = engine_with_policy(&[vendor.clone()], policy).await;

    let referrer = Uuid::new_v4();
    let referred = Uuid::new_v4();
    h.store
        .add_user(User {
            id: referred,
            referred_by: Some(referrer),
            created_at: Utc::now(),
        })
        .await;
    h.store.add_wallet(referred, dec!(5000)).await;

    h.orchestrator
        .purchase(data_request(referred, dec!(1000)))
        .await
        .unwrap();
    let earnings = h.referral.earnings(referrer, 10).await.unwrap();
    assert_eq!(earnings.len(), 1);
    // 50 flat plus 2% of 1000.
    assert_eq!(earnings[0].amount, dec!(70.00));
    assert_eq!(earnings[0].status, "pending");

    // A second purchase by the same referred user earns nothing more.
    h.orchestrator
        .purchase(data_request(referred, dec!(1000)))
        .await
        .unwrap();
    let earnings = h.referral.earnings(referrer, 10).await.unwrap();
    assert_eq!(earnings.len(), 1);
    assert_eq!(h.emitter.count_of(NotificationKind::ReferralEarning), 1);

    let payout = h.referral.withdraw(referrer).await.unwrap();
    assert_eq!(payout.amount, dec!(70.00));
    assert_eq!(payout.entries_settled, 1);
    assert_eq!(payout.ledger_entry.kind, "admin_credit");

    let wallet = h.store.find_wallet(referrer).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(70.00));

    match h.referral.withdraw(referrer).await.unwrap_err() {
        AppError::NotFound(_) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_funding_credit_applies_once() {
    let h = engine_with(&[]).await;
    let owner = Uuid::new_v4();
    h.store.add_wallet(owner, dec!(0)).await;

    let entry = NewLedgerEntry::credit(
        owner,
        LedgerKind::WalletFunding,
        dec!(2500),
        "fund_psk_001".to_string(),
        EntryDetails::funding("paystack", "psk_001", Some("card".to_string())).to_value(),
    );

    let first = h.ledger.credit(&entry).await.unwrap();
    assert!(!first.is_replay());
    let second = h.ledger.credit(&entry).await.unwrap();
    assert!(second.is_replay());
    assert_eq!(second.entry().id, first.entry().id);

    let wallet = h.store.find_wallet(owner).await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(2500));
}
