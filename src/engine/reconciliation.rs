//! Reconciliation sweep
//!
//! Pending purchases past the cutoff are resolved from the attempt trail:
//! each recorded attempt is re-queried at its vendor, a confirmed delivery
//! finalizes the entry, and only an entry whose every attempt provably
//! failed gets reversed. Anything ambiguous stays pending for the next run.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::engine::ledger::WalletLedger;
use crate::engine::referral::ReferralEngine;
use crate::error::AppResult;
use crate::model::{AttemptOutcome, EntryDetails, FinalizeMeta, LedgerEntry};
use crate::notifications::{NotificationEmitter, NotificationIntent};
use crate::vendors::types::VerifyOutcome;
use crate::vendors::VendorRegistry;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub examined: usize,
    pub completed: usize,
    pub reversed: usize,
    pub deferred: usize,
}

enum Resolution {
    Completed,
    Reversed,
    Deferred,
}

pub struct ReconciliationSweep {
    ledger: Arc<WalletLedger>,
    registry: Arc<VendorRegistry>,
    referral: Arc<ReferralEngine>,
    notifier: Arc<dyn NotificationEmitter>,
    cutoff: chrono::Duration,
    batch_size: i64,
}

impl ReconciliationSweep {
    pub fn new(
        ledger: Arc<WalletLedger>,
        registry: Arc<VendorRegistry>,
        referral: Arc<ReferralEngine>,
        notifier: Arc<dyn NotificationEmitter>,
        cutoff: Duration,
        batch_size: i64,
    ) -> Self {
        let cutoff = chrono::Duration::from_std(cutoff)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        Self {
            ledger,
            registry,
            referral,
            notifier,
            cutoff,
            batch_size,
        }
    }

    /// One pass over the stalled entries. Errors on a single entry defer it
    /// rather than aborting the pass.
    pub async fn run_once(&self) -> AppResult<SweepReport> {
        let older_than = chrono::Utc::now() - self.cutoff;
        let stalled = self
            .ledger
            .stalled_purchases(older_than, self.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stalled.len(),
            ..SweepReport::default()
        };
        for entry in stalled {
            match self.resolve_entry(&entry).await {
                Ok(Resolution::Completed) => report.completed += 1,
                Ok(Resolution::Reversed) => report.reversed += 1,
                Ok(Resolution::Deferred) => report.deferred += 1,
                Err(e) => {
                    warn!("Could not reconcile {}: {}", entry.reference, e);
                    report.deferred += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                "Reconciliation sweep: examined={}, completed={}, reversed={}, deferred={}",
                report.examined, report.completed, report.reversed, report.deferred
            );
        }
        Ok(report)
    }

    /// Run the sweep on a fixed interval until the task is aborted.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup does not
            // double as a sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!("Reconciliation sweep failed: {}", e);
                }
            }
        })
    }

    async fn resolve_entry(&self, entry: &LedgerEntry) -> AppResult<Resolution> {
        let attempts = EntryDetails::from_entry(entry)
            .map(|d| d.attempts().to_vec())
            .unwrap_or_default();

        if attempts.is_empty() {
            // The process died between reserve and the first write-ahead.
            // No vendor can have seen this order.
            let transition = self
                .ledger
                .reverse(entry.id, "no dispatch attempt was recorded")
                .await?;
            if transition.was_applied() {
                self.notify_refund(transition.entry(), "no dispatch attempt was recorded")
                    .await;
            }
            return Ok(Resolution::Reversed);
        }

        let mut all_failed = true;
        for attempt in attempts.iter().rev() {
            // A closed rejection is already a proven failure.
            if attempt.outcome == Some(AttemptOutcome::Rejected) {
                continue;
            }
            let Some(adapter) = self.registry.get(&attempt.vendor) else {
                warn!(
                    "No adapter '{}' to verify attempt {} of {}",
                    attempt.vendor, attempt.request_id, entry.reference
                );
                all_failed = false;
                continue;
            };

            match adapter.verify(&attempt.request_id).await {
                VerifyOutcome::Confirmed { vendor_reference } => {
                    let meta = FinalizeMeta {
                        vendor_name: attempt.vendor.clone(),
                        vendor_reference,
                        cost_price: None,
                        details: None,
                    };
                    let transition = self.ledger.finalize(entry.id, &meta).await?;
                    if transition.was_applied() {
                        info!(
                            "Reconciled {} as completed via {}",
                            entry.reference, attempt.vendor
                        );
                        match self.referral.on_purchase_completed(transition.entry()).await {
                            Ok(Some(earning)) => {
                                self.notifier
                                    .emit(NotificationIntent::referral_earning(
                                        earning.referrer_id,
                                        earning.amount,
                                    ))
                                    .await;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("Referral hook failed for {}: {}", entry.reference, e)
                            }
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
                    return Ok(Resolution::Completed);
                }
                VerifyOutcome::Failed { reason } => {
                    info!(
                        "Attempt {} of {} verified as failed: {}",
                        attempt.request_id, entry.reference, reason
                    );
                }
                VerifyOutcome::Unknown => {
                    all_failed = false;
                }
            }
        }

        if all_failed {
            let transition = self
                .ledger
                .reverse(entry.id, "all dispatch attempts failed")
                .await?;
            if transition.was_applied() {
                info!("Reconciled {} as reversed", entry.reference);
                self.notify_refund(transition.entry(), "all dispatch attempts failed")
                    .await;
            }
            return Ok(Resolution::Reversed);
        }
        Ok(Resolution::Deferred)
    }

    async fn notify_refund(&self, entry: &LedgerEntry, reason: &str) {
        self.notifier
            .emit(NotificationIntent::purchase_refunded(
                entry.owner_id,
                &entry.reference,
                entry.amount,
                reason,
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::repository::WalletStore;
    use crate::engine::referral::ReferralPolicy;
    use crate::model::{DispatchAttempt, NewLedgerEntry, ServiceType};
    use crate::notifications::LogEmitter;
    use crate::vendors::traits::VendorAdapter;
    use crate::vendors::types::{DispatchOutcome, PlanQuote, PurchaseOrder};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct ScriptedVerify {
        id: String,
        outcome: VerifyOutcome,
    }

    #[async_trait]
    impl VendorAdapter for ScriptedVerify {
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
            DispatchOutcome::Unavailable {
                reason: "not under test".to_string(),
            }
        }

        async fn verify(&self, _: &str) -> VerifyOutcome {
            self.outcome.clone()
        }
    }

    fn policy() -> ReferralPolicy {
        ReferralPolicy {
            first_purchase_bonus: dec!(0),
            base_rate: dec!(0),
            boosted_rate: dec!(0),
            boost_threshold: dec!(1),
        }
    }

    async fn sweep_with(
        store: MemoryStore,
        registry: VendorRegistry,
    ) -> Arc<ReconciliationSweep> {
        let ledger = Arc::new(WalletLedger::new(Arc::new(store.clone())));
        let referral = Arc::new(ReferralEngine::new(
            Arc::new(store.clone()),
            Arc::new(store),
            policy(),
        ));
        Arc::new(ReconciliationSweep::new(
            ledger,
            Arc::new(registry),
            referral,
            Arc::new(LogEmitter),
            Duration::ZERO,
            50,
        ))
    }

    async fn stalled_purchase(store: &MemoryStore, owner: Uuid, vendor: &str) -> LedgerEntry {
        store.add_wallet(owner, dec!(1000)).await;
        let mut details = EntryDetails::purchase(
            ServiceType::Data,
            "mtn",
            "08031234567",
            serde_json::json!({ "plan_code": "D-1GB" }),
        );
        let outcome = store
            .reserve_debit(&NewLedgerEntry::purchase(
                owner,
                dec!(400),
                format!("pur_{}", Uuid::new_v4().simple()),
                ServiceType::Data,
                "mtn".to_string(),
                details.to_value(),
            ))
            .await
            .unwrap();
        let entry = outcome.entry().clone();
        details.push_attempt(DispatchAttempt {
            vendor: vendor.to_string(),
            request_id: format!("{}-1", entry.reference),
            started_at: chrono::Utc::now(),
            outcome: Some(AttemptOutcome::Unavailable),
            reason: Some("timed out".to_string()),
        });
        store
            .update_details(entry.id, &details.to_value())
            .await
            .unwrap();
        entry
    }

    #[tokio::test]
    async fn confirmed_attempt_completes_the_entry() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let entry = stalled_purchase(&store, owner, "scripted").await;

        let mut registry = VendorRegistry::new();
        registry.register(Arc::new(ScriptedVerify {
            id: "scripted".to_string(),
            outcome: VerifyOutcome::Confirmed {
                vendor_reference: Some("VT-99".to_string()),
            },
        }));

        let sweep = sweep_with(store.clone(), registry).await;
        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.completed, 1);

        let settled = store.find_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.status, "completed");
        assert_eq!(settled.vendor_name.as_deref(), Some("scripted"));
        assert_eq!(settled.vendor_reference.as_deref(), Some("VT-99"));
        // Balance stays charged.
        let wallet = store.find_wallet(owner).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(600));
    }

    #[tokio::test]
    async fn proven_failures_reverse_and_refund() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let entry = stalled_purchase(&store, owner, "scripted").await;

        let mut registry = VendorRegistry::new();
        registry.register(Arc::new(ScriptedVerify {
            id: "scripted".to_string(),
            outcome: VerifyOutcome::Failed {
                reason: "ORDER_FAILED".to_string(),
            },
        }));

        let sweep = sweep_with(store.clone(), registry).await;
        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.reversed, 1);

        let settled = store.find_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.status, "reversed");
        let wallet = store.find_wallet(owner).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(1000));
    }

    #[tokio::test]
    async fn unknown_outcome_defers_the_entry() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let entry = stalled_purchase(&store, owner, "scripted").await;

        let mut registry = VendorRegistry::new();
        registry.register(Arc::new(ScriptedVerify {
            id: "scripted".to_string(),
            outcome: VerifyOutcome::Unknown,
        }));

        let sweep = sweep_with(store.clone(), registry).await;
        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.deferred, 1);

        let still = store.find_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(still.status, "pending");
        let wallet = store.find_wallet(owner).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(600));
    }

    #[tokio::test]
    async fn entry_without_attempts_is_reversed() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store.add_wallet(owner, dec!(500)).await;
        let outcome = store
            .reserve_debit(&NewLedgerEntry::purchase(
                owner,
                dec!(500),
                "pur_orphan".to_string(),
                ServiceType::Data,
                "mtn".to_string(),
                EntryDetails::purchase(
                    ServiceType::Data,
                    "mtn",
                    "08031234567",
                    serde_json::json!({}),
                )
                .to_value(),
            ))
            .await
            .unwrap();

        let sweep = sweep_with(store.clone(), VendorRegistry::new()).await;
        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.reversed, 1);

        let entry = store.find_entry(outcome.entry().id).await.unwrap().unwrap();
        assert_eq!(entry.status, "reversed");
        let wallet = store.find_wallet(owner).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(500));
    }
}
