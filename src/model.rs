//! Core domain types for the purchase and wallet transaction engine.
//!
//! Entities are plain `FromRow` structs mirroring their tables; lifecycle
//! columns (`kind`, `status`) are stored as text and parsed through the
//! enum helpers below so an unexpected value in the database surfaces as an
//! explicit error instead of a panic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Schema version written into every `details` payload.
pub const ENTRY_DETAILS_VERSION: u32 = 1;

fn default_details_version() -> u32 {
    ENTRY_DETAILS_VERSION
}

/// Category of prepaid product a purchase fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Data,
    Airtime,
    Cable,
    Electricity,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Data => "data",
            ServiceType::Airtime => "airtime",
            ServiceType::Cable => "cable",
            ServiceType::Electricity => "electricity",
        }
    }

    pub const ALL: [ServiceType; 4] = [
        ServiceType::Data,
        ServiceType::Airtime,
        ServiceType::Cable,
        ServiceType::Electricity,
    ];
}

impl TryFrom<&str> for ServiceType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "data" => Ok(ServiceType::Data),
            "airtime" => Ok(ServiceType::Airtime),
            "cable" => Ok(ServiceType::Cable),
            "electricity" => Ok(ServiceType::Electricity),
            other => Err(format!("unknown service type '{}'", other)),
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a ledger entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Purchase,
    WalletFunding,
    AdminCredit,
    AdminDebit,
    Refund,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Purchase => "purchase",
            LedgerKind::WalletFunding => "wallet_funding",
            LedgerKind::AdminCredit => "admin_credit",
            LedgerKind::AdminDebit => "admin_debit",
            LedgerKind::Refund => "refund",
        }
    }

    /// Credits settle immediately; debits go through reserve/finalize.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            LedgerKind::WalletFunding | LedgerKind::AdminCredit | LedgerKind::Refund
        )
    }

    pub fn is_debit(&self) -> bool {
        !self.is_credit()
    }
}

impl TryFrom<&str> for LedgerKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "purchase" => Ok(LedgerKind::Purchase),
            "wallet_funding" => Ok(LedgerKind::WalletFunding),
            "admin_credit" => Ok(LedgerKind::AdminCredit),
            "admin_debit" => Ok(LedgerKind::AdminDebit),
            "refund" => Ok(LedgerKind::Refund),
            other => Err(format!("unknown ledger kind '{}'", other)),
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a ledger entry. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Completed => "completed",
            LedgerStatus::Failed => "failed",
            LedgerStatus::Reversed => "reversed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LedgerStatus::Pending)
    }
}

impl TryFrom<&str> for LedgerStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(LedgerStatus::Pending),
            "completed" => Ok(LedgerStatus::Completed),
            "failed" => Ok(LedgerStatus::Failed),
            "reversed" => Ok(LedgerStatus::Reversed),
            other => Err(format!("unknown ledger status '{}'", other)),
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet entity. One row per owner; mutated only through ledger operations.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of one wallet-affecting event.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: String,
    pub status: String,
    pub amount: Decimal,
    pub reference: String,
    pub service_type: Option<String>,
    pub network: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_reference: Option<String>,
    pub cost_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn entry_kind(&self) -> Result<LedgerKind, String> {
        LedgerKind::try_from(self.kind.as_str())
    }

    pub fn entry_status(&self) -> Result<LedgerStatus, String> {
        LedgerStatus::try_from(self.status.as_str())
    }

    pub fn is_pending(&self) -> bool {
        self.status == LedgerStatus::Pending.as_str()
    }
}

/// Insert payload for a ledger entry. The store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub owner_id: Uuid,
    pub kind: LedgerKind,
    pub amount: Decimal,
    pub reference: String,
    pub service_type: Option<ServiceType>,
    pub network: Option<String>,
    pub selling_price: Option<Decimal>,
    pub details: Option<serde_json::Value>,
}

impl NewLedgerEntry {
    /// A purchase debit: reserved now, finalized after vendor dispatch.
    pub fn purchase(
        owner_id: Uuid,
        amount: Decimal,
        reference: String,
        service_type: ServiceType,
        network: String,
        details: serde_json::Value,
    ) -> Self {
        Self {
            owner_id,
            kind: LedgerKind::Purchase,
            amount,
            reference,
            service_type: Some(service_type),
            network: Some(network),
            selling_price: Some(amount),
            details: Some(details),
        }
    }

    /// A credit entry: settles in one step.
    pub fn credit(
        owner_id: Uuid,
        kind: LedgerKind,
        amount: Decimal,
        reference: String,
        details: serde_json::Value,
    ) -> Self {
        Self {
            owner_id,
            kind,
            amount,
            reference,
            service_type: None,
            network: None,
            selling_price: None,
            details: Some(details),
        }
    }

    /// An admin debit: settles in one step, still balance-guarded.
    pub fn debit(
        owner_id: Uuid,
        kind: LedgerKind,
        amount: Decimal,
        reference: String,
        details: serde_json::Value,
    ) -> Self {
        Self {
            owner_id,
            kind,
            amount,
            reference,
            service_type: None,
            network: None,
            selling_price: None,
            details: Some(details),
        }
    }
}

/// Result of an idempotent write keyed by reference.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// A new entry was created and the balance mutated.
    Created(LedgerEntry),
    /// The reference already existed; the original entry is returned and
    /// nothing was mutated.
    Replayed(LedgerEntry),
}

impl ReserveOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            ReserveOutcome::Created(entry) | ReserveOutcome::Replayed(entry) => entry,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, ReserveOutcome::Replayed(_))
    }
}

/// Result of a status transition attempt on a pending entry.
#[derive(Debug, Clone)]
pub enum EntryTransition {
    /// This call performed the transition.
    Applied(LedgerEntry),
    /// The entry had already left the pending state; the current row is
    /// returned unchanged.
    AlreadySettled(LedgerEntry),
}

impl EntryTransition {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            EntryTransition::Applied(entry) | EntryTransition::AlreadySettled(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            EntryTransition::Applied(entry) | EntryTransition::AlreadySettled(entry) => entry,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, EntryTransition::Applied(_))
    }
}

/// Vendor metadata attached when a pending purchase completes.
#[derive(Debug, Clone)]
pub struct FinalizeMeta {
    pub vendor_name: String,
    pub vendor_reference: Option<String>,
    pub cost_price: Option<Decimal>,
    pub details: Option<serde_json::Value>,
}

/// One external vendor as administered in `vendor_configs`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VendorConfig {
    pub id: Uuid,
    pub adapter_id: String,
    pub display_name: String,
    pub services: Vec<String>,
    pub is_enabled: bool,
    pub priority: i32,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VendorConfig {
    pub fn supports(&self, service: ServiceType) -> bool {
        self.services.iter().any(|s| s == service.as_str())
    }

    pub fn service_types(&self) -> Vec<ServiceType> {
        self.services
            .iter()
            .filter_map(|s| ServiceType::try_from(s.as_str()).ok())
            .collect()
    }
}

/// Ordered vendor preference for one (service type, network) pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ServiceRoute {
    pub id: Uuid,
    pub service_type: String,
    pub network: String,
    pub vendors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Commission credited to a referrer for a referred user's first purchase.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReferralEarning {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_user_id: Uuid,
    pub source_entry_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningStatus {
    Pending,
    Withdrawn,
}

impl EarningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningStatus::Pending => "pending",
            EarningStatus::Withdrawn => "withdrawn",
        }
    }
}

/// Insert payload for a referral earning.
#[derive(Debug, Clone)]
pub struct NewReferralEarning {
    pub referrer_id: Uuid,
    pub referred_user_id: Uuid,
    pub source_entry_id: Uuid,
    pub amount: Decimal,
}

/// Settled referral payout: earnings flipped to withdrawn plus the wallet
/// credit that paid them, all in one atomic step.
#[derive(Debug, Clone)]
pub struct ReferralWithdrawal {
    pub amount: Decimal,
    pub entries_settled: i64,
    pub ledger_entry: LedgerEntry,
}

/// Minimal projection of a user account. The full account system lives
/// elsewhere; the engine only needs the referral link.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub referred_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Caller-facing status of a purchase request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Completed,
    Refunded,
    /// Vendor outcome is not yet known; the reconciliation sweep will
    /// resolve the entry. Serialized as "processing".
    #[serde(rename = "processing")]
    PendingReconciliation,
}

/// Terminal (or reconciliation-pending) result of a purchase call.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub status: PurchaseStatus,
    pub entry_id: Uuid,
    pub reference: String,
    pub vendor_name: Option<String>,
    pub vendor_reference: Option<String>,
    pub message: Option<String>,
    pub replayed: bool,
}

/// Incoming purchase request, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub owner_id: Uuid,
    pub service_type: ServiceType,
    pub network: String,
    pub recipient: String,
    #[serde(default)]
    pub vendor_params: serde_json::Value,
    pub selling_price: Decimal,
    #[serde(default)]
    pub reference: Option<String>,
}

/// One dispatch attempt against a vendor, written ahead of the call so an
/// interrupted process leaves evidence for the reconciliation sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub vendor: String,
    /// Per-attempt request id handed to the vendor; requery uses this.
    pub request_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub outcome: Option<AttemptOutcome>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Delivered,
    Rejected,
    Unavailable,
}

/// Structured, versioned payload stored in `ledger_entries.details`.
///
/// Stored as JSONB; unknown extra fields are tolerated on read so the
/// schema can grow without migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryDetails {
    Purchase {
        #[serde(default = "default_details_version")]
        version: u32,
        service_type: ServiceType,
        network: String,
        recipient: String,
        vendor_params: serde_json::Value,
        #[serde(default)]
        attempts: Vec<DispatchAttempt>,
    },
    Funding {
        #[serde(default = "default_details_version")]
        version: u32,
        gateway: String,
        gateway_reference: String,
        #[serde(default)]
        channel: Option<String>,
    },
    Adjustment {
        #[serde(default = "default_details_version")]
        version: u32,
        initiated_by: String,
        #[serde(default)]
        note: Option<String>,
    },
    Refund {
        #[serde(default = "default_details_version")]
        version: u32,
        source_reference: String,
        reason: String,
    },
}

impl EntryDetails {
    pub fn purchase(
        service_type: ServiceType,
        network: &str,
        recipient: &str,
        vendor_params: serde_json::Value,
    ) -> Self {
        EntryDetails::Purchase {
            version: ENTRY_DETAILS_VERSION,
            service_type,
            network: network.to_string(),
            recipient: recipient.to_string(),
            vendor_params,
            attempts: Vec::new(),
        }
    }

    pub fn funding(gateway: &str, gateway_reference: &str, channel: Option<String>) -> Self {
        EntryDetails::Funding {
            version: ENTRY_DETAILS_VERSION,
            gateway: gateway.to_string(),
            gateway_reference: gateway_reference.to_string(),
            channel,
        }
    }

    pub fn adjustment(initiated_by: &str, note: Option<String>) -> Self {
        EntryDetails::Adjustment {
            version: ENTRY_DETAILS_VERSION,
            initiated_by: initiated_by.to_string(),
            note,
        }
    }

    pub fn refund(source_reference: &str, reason: &str) -> Self {
        EntryDetails::Refund {
            version: ENTRY_DETAILS_VERSION,
            source_reference: source_reference.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_entry(entry: &LedgerEntry) -> Option<Self> {
        entry
            .details
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Appends a write-ahead attempt record. No-op for non-purchase payloads.
    pub fn push_attempt(&mut self, attempt: DispatchAttempt) {
        if let EntryDetails::Purchase { attempts, .. } = self {
            attempts.push(attempt);
        }
    }

    /// Closes the most recent attempt with its observed outcome.
    pub fn close_attempt(&mut self, outcome: AttemptOutcome, reason: Option<String>) {
        if let EntryDetails::Purchase { attempts, .. } = self {
            if let Some(last) = attempts.last_mut() {
                last.outcome = Some(outcome);
                last.reason = reason;
            }
        }
    }

    pub fn attempts(&self) -> &[DispatchAttempt] {
        match self {
            EntryDetails::Purchase { attempts, .. } => attempts,
            _ => &[],
        }
    }
}
