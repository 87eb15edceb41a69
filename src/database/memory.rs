//! In-memory store implementing every storage trait against plain maps.
//!
//! Used by tests and local development. A single write lock around the whole
//! state gives the same atomicity the Postgres transactions provide, and each
//! method mirrors its SQL counterpart's semantics, including reference
//! replays and the `failure_reason` merge on refunds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::{
    ReferralStore, RoutingStore, UserStore, VendorConfigStore, WalletStore,
};
use crate::model::{
    EntryTransition, FinalizeMeta, LedgerEntry, LedgerKind, LedgerStatus, NewLedgerEntry,
    NewReferralEarning, ReferralEarning, ReferralWithdrawal, ReserveOutcome, ServiceRoute,
    ServiceType, User, VendorConfig, Wallet,
};

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    entries: Vec<LedgerEntry>,
    routes: HashMap<(String, String), ServiceRoute>,
    vendor_configs: Vec<VendorConfig>,
    earnings: Vec<ReferralEarning>,
    users: HashMap<Uuid, User>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryState>>,
}

fn make_entry(new_entry: &NewLedgerEntry, status: LedgerStatus) -> LedgerEntry {
    let now = Utc::now();
    LedgerEntry {
        id: Uuid::new_v4(),
        owner_id: new_entry.owner_id,
        kind: new_entry.kind.as_str().to_string(),
        status: status.as_str().to_string(),
        amount: new_entry.amount,
        reference: new_entry.reference.clone(),
        service_type: new_entry.service_type.map(|s| s.as_str().to_string()),
        network: new_entry.network.clone(),
        vendor_name: None,
        vendor_reference: None,
        cost_price: None,
        selling_price: new_entry.selling_price,
        profit: None,
        details: new_entry.details.clone(),
        created_at: now,
        updated_at: now,
    }
}

fn zero_wallet(owner_id: Uuid) -> Wallet {
    let now = Utc::now();
    Wallet {
        user_id: owner_id,
        balance: Decimal::ZERO,
        created_at: now,
        updated_at: now,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id, user);
    }

    pub async fn add_wallet(&self, owner_id: Uuid, balance: Decimal) {
        let mut wallet = zero_wallet(owner_id);
        wallet.balance = balance;
        self.inner.write().await.wallets.insert(owner_id, wallet);
    }

    pub async fn add_vendor_config(&self, config: VendorConfig) {
        self.inner.write().await.vendor_configs.push(config);
    }

    pub async fn add_route(&self, route: ServiceRoute) {
        let key = (route.service_type.clone(), route.network.clone());
        self.inner.write().await.routes.insert(key, route);
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn find_wallet(&self, owner_id: Uuid) -> DbResult<Option<Wallet>> {
        Ok(self.inner.read().await.wallets.get(&owner_id).cloned())
    }

    async fn ensure_wallet(&self, owner_id: Uuid) -> DbResult<Wallet> {
        let mut state = self.inner.write().await;
        let wallet = state
            .wallets
            .entry(owner_id)
            .or_insert_with(|| zero_wallet(owner_id));
        Ok(wallet.clone())
    }

    async fn reserve_debit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;

        if let Some(existing) = state
            .entries
            .iter()
            .find(|e| e.reference == new_entry.reference)
        {
            return Ok(ReserveOutcome::Replayed(existing.clone()));
        }

        let wallet = state
            .wallets
            .get_mut(&new_entry.owner_id)
            .ok_or_else(|| DatabaseError::not_found("Wallet", new_entry.owner_id))?;
        if wallet.balance < new_entry.amount {
            return Err(DatabaseError::insufficient_balance(
                wallet.balance,
                new_entry.amount,
            ));
        }
        wallet.balance -= new_entry.amount;
        wallet.updated_at = Utc::now();

        let entry = make_entry(new_entry, LedgerStatus::Pending);
        state.entries.push(entry.clone());
        Ok(ReserveOutcome::Created(entry))
    }

    async fn settle_credit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;

        if let Some(existing) = state
            .entries
            .iter()
            .find(|e| e.reference == new_entry.reference)
        {
            return Ok(ReserveOutcome::Replayed(existing.clone()));
        }

        let wallet = state
            .wallets
            .entry(new_entry.owner_id)
            .or_insert_with(|| zero_wallet(new_entry.owner_id));
        wallet.balance += new_entry.amount;
        wallet.updated_at = Utc::now();

        let entry = make_entry(new_entry, LedgerStatus::Completed);
        state.entries.push(entry.clone());
        Ok(ReserveOutcome::Created(entry))
    }

    async fn settle_debit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;

        if let Some(existing) = state
            .entries
            .iter()
            .find(|e| e.reference == new_entry.reference)
        {
            return Ok(ReserveOutcome::Replayed(existing.clone()));
        }

        let wallet = state
            .wallets
            .get_mut(&new_entry.owner_id)
            .ok_or_else(|| DatabaseError::not_found("Wallet", new_entry.owner_id))?;
        if wallet.balance < new_entry.amount {
            return Err(DatabaseError::insufficient_balance(
                wallet.balance,
                new_entry.amount,
            ));
        }
        wallet.balance -= new_entry.amount;
        wallet.updated_at = Utc::now();

        let entry = make_entry(new_entry, LedgerStatus::Completed);
        state.entries.push(entry.clone());
        Ok(ReserveOutcome::Created(entry))
    }

    async fn finalize_entry(
        &self,
        entry_id: Uuid,
        meta: &FinalizeMeta,
    ) -> DbResult<EntryTransition> {
        let mut state = self.inner.write().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| DatabaseError::not_found("LedgerEntry", entry_id))?;

        if !entry.is_pending() {
            return Ok(EntryTransition::AlreadySettled(entry.clone()));
        }

        entry.status = LedgerStatus::Completed.as_str().to_string();
        entry.vendor_name = Some(meta.vendor_name.clone());
        entry.vendor_reference = meta.vendor_reference.clone();
        entry.cost_price = meta.cost_price;
        if let (Some(cost), Some(selling)) = (meta.cost_price, entry.selling_price) {
            entry.profit = Some(selling - cost);
        }
        if let Some(details) = &meta.details {
            entry.details = Some(details.clone());
        }
        entry.updated_at = Utc::now();
        Ok(EntryTransition::Applied(entry.clone()))
    }

    async fn refund_entry(
        &self,
        entry_id: Uuid,
        to_status: LedgerStatus,
        reason: &str,
    ) -> DbResult<EntryTransition> {
        if !matches!(to_status, LedgerStatus::Failed | LedgerStatus::Reversed) {
            return Err(DatabaseError::new(DatabaseErrorKind::QueryError {
                message: format!("refund cannot target status '{}'", to_status),
            }));
        }

        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| DatabaseError::not_found("LedgerEntry", entry_id))?;

        if !entry.is_pending() {
            return Ok(EntryTransition::AlreadySettled(entry.clone()));
        }

        entry.status = to_status.as_str().to_string();
        let mut details = entry
            .details
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        if let Some(map) = details.as_object_mut() {
            map.insert(
                "failure_reason".to_string(),
                Value::String(reason.to_string()),
            );
        }
        entry.details = Some(details);
        entry.updated_at = Utc::now();

        let owner_id = entry.owner_id;
        let amount = entry.amount;
        let snapshot = entry.clone();

        let wallet = state
            .wallets
            .entry(owner_id)
            .or_insert_with(|| zero_wallet(owner_id));
        wallet.balance += amount;
        wallet.updated_at = Utc::now();

        Ok(EntryTransition::Applied(snapshot))
    }

    async fn update_details(&self, entry_id: Uuid, details: &Value) -> DbResult<bool> {
        let mut state = self.inner.write().await;
        match state
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id && e.is_pending())
        {
            Some(entry) => {
                entry.details = Some(details.clone());
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_entry(&self, entry_id: Uuid) -> DbResult<Option<LedgerEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.id == entry_id)
            .cloned())
    }

    async fn find_entry_by_reference(&self, reference: &str) -> DbResult<Option<LedgerEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.reference == reference)
            .cloned())
    }

    async fn list_entries(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<LedgerEntry>> {
        let state = self.inner.read().await;
        let mut owned: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_stalled_pending(
        &self,
        kind: LedgerKind,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<LedgerEntry>> {
        let state = self.inner.read().await;
        let mut stalled: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.kind == kind.as_str() && e.is_pending() && e.created_at < older_than)
            .cloned()
            .collect();
        stalled.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stalled.truncate(limit.max(0) as usize);
        Ok(stalled)
    }

    async fn ledger_balance(&self, owner_id: Uuid) -> DbResult<Decimal> {
        let state = self.inner.read().await;
        let mut balance = Decimal::ZERO;
        for entry in state.entries.iter().filter(|e| e.owner_id == owner_id) {
            let credit = matches!(
                entry.kind.as_str(),
                "wallet_funding" | "admin_credit" | "refund"
            );
            match (credit, entry.status.as_str()) {
                (true, "completed") => balance += entry.amount,
                (false, "pending") | (false, "completed") => balance -= entry.amount,
                _ => {}
            }
        }
        Ok(balance)
    }
}

#[async_trait]
impl RoutingStore for MemoryStore {
    async fn find_route(
        &self,
        service_type: ServiceType,
        network: &str,
    ) -> DbResult<Option<ServiceRoute>> {
        let key = (service_type.as_str().to_string(), network.to_string());
        Ok(self.inner.read().await.routes.get(&key).cloned())
    }
}

#[async_trait]
impl VendorConfigStore for MemoryStore {
    async fn list_all(&self) -> DbResult<Vec<VendorConfig>> {
        let mut configs = self.inner.read().await.vendor_configs.clone();
        configs.sort_by(|a, b| (a.priority, &a.adapter_id).cmp(&(b.priority, &b.adapter_id)));
        Ok(configs)
    }

    async fn list_enabled_for(&self, service_type: ServiceType) -> DbResult<Vec<VendorConfig>> {
        let mut configs: Vec<VendorConfig> = self
            .inner
            .read()
            .await
            .vendor_configs
            .iter()
            .filter(|c| c.is_enabled && c.supports(service_type))
            .cloned()
            .collect();
        configs.sort_by(|a, b| (a.priority, &a.adapter_id).cmp(&(b.priority, &b.adapter_id)));
        Ok(configs)
    }

    async fn find_by_adapter_id(&self, adapter_id: &str) -> DbResult<Option<VendorConfig>> {
        Ok(self
            .inner
            .read()
            .await
            .vendor_configs
            .iter()
            .find(|c| c.adapter_id == adapter_id)
            .cloned())
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn record_earning(
        &self,
        earning: &NewReferralEarning,
    ) -> DbResult<Option<ReferralEarning>> {
        let mut state = self.inner.write().await;
        if state
            .earnings
            .iter()
            .any(|e| e.referred_user_id == earning.referred_user_id)
        {
            return Ok(None);
        }
        let recorded = ReferralEarning {
            id: Uuid::new_v4(),
            referrer_id: earning.referrer_id,
            referred_user_id: earning.referred_user_id,
            source_entry_id: earning.source_entry_id,
            amount: earning.amount,
            status: "pending".to_string(),
            created_at: Utc::now(),
            withdrawn_at: None,
        };
        state.earnings.push(recorded.clone());
        Ok(Some(recorded))
    }

    async fn list_earnings(
        &self,
        referrer_id: Uuid,
        limit: i64,
    ) -> DbResult<Vec<ReferralEarning>> {
        let state = self.inner.read().await;
        let mut earned: Vec<ReferralEarning> = state
            .earnings
            .iter()
            .filter(|e| e.referrer_id == referrer_id)
            .cloned()
            .collect();
        earned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        earned.truncate(limit.max(0) as usize);
        Ok(earned)
    }

    async fn withdraw_earnings(
        &self,
        referrer_id: Uuid,
        reference: &str,
        details: &Value,
    ) -> DbResult<Option<ReferralWithdrawal>> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;

        let now = Utc::now();
        let mut total = Decimal::ZERO;
        let mut settled = 0i64;
        for earning in state
            .earnings
            .iter_mut()
            .filter(|e| e.referrer_id == referrer_id && e.status == "pending")
        {
            earning.status = "withdrawn".to_string();
            earning.withdrawn_at = Some(now);
            total += earning.amount;
            settled += 1;
        }
        if settled == 0 {
            return Ok(None);
        }

        let wallet = state
            .wallets
            .entry(referrer_id)
            .or_insert_with(|| zero_wallet(referrer_id));
        wallet.balance += total;
        wallet.updated_at = now;

        let new_entry = NewLedgerEntry {
            owner_id: referrer_id,
            kind: LedgerKind::AdminCredit,
            amount: total,
            reference: reference.to_string(),
            service_type: None,
            network: None,
            selling_price: None,
            details: Some(details.clone()),
        };
        let entry = make_entry(&new_entry, LedgerStatus::Completed);
        state.entries.push(entry.clone());

        Ok(Some(ReferralWithdrawal {
            amount: total,
            entries_settled: settled,
            ledger_entry: entry,
        }))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> DbResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }
}
