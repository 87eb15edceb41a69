use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::database::error::DbResult;
use crate::model::{
    EntryTransition, FinalizeMeta, LedgerEntry, LedgerKind, LedgerStatus, NewLedgerEntry,
    NewReferralEarning, ReferralEarning, ReferralWithdrawal, ReserveOutcome, ServiceRoute,
    ServiceType, User, VendorConfig, Wallet,
};

/// Wallet and ledger storage. Every balance mutation goes through here and
/// writes a ledger row in the same transaction; the wallet balance column is
/// a cache of the ledger, never the other way around.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Fetch a wallet by owner.
    async fn find_wallet(&self, owner_id: Uuid) -> DbResult<Option<Wallet>>;

    /// Fetch a wallet, creating a zero-balance row if none exists.
    async fn ensure_wallet(&self, owner_id: Uuid) -> DbResult<Wallet>;

    /// Atomically debit the wallet and insert a pending debit entry.
    ///
    /// Returns `Replayed` with the existing entry when the reference has
    /// already been used, leaving the balance untouched. Fails with
    /// `InsufficientBalance` when the wallet cannot cover the amount.
    async fn reserve_debit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome>;

    /// Atomically credit the wallet and insert a completed credit entry.
    ///
    /// Creates the wallet if it does not exist yet. Replays by reference the
    /// same way `reserve_debit` does.
    async fn settle_credit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome>;

    /// Atomically debit the wallet and insert a completed debit entry.
    ///
    /// Unlike `reserve_debit` the entry settles immediately; used for
    /// administrative debits that have no dispatch phase.
    async fn settle_debit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome>;

    /// Move a pending entry to completed and stamp the vendor outcome on it.
    ///
    /// Returns `AlreadySettled` when the entry left the pending state before
    /// this call; the stored row is returned unchanged in that case.
    async fn finalize_entry(&self, entry_id: Uuid, meta: &FinalizeMeta) -> DbResult<EntryTransition>;

    /// Move a pending debit entry to a terminal failure state and restore the
    /// reserved amount to the wallet, in one transaction.
    ///
    /// `to_status` must be `Failed` or `Reversed`. The reason is merged into
    /// the entry details under `failure_reason`.
    async fn refund_entry(
        &self,
        entry_id: Uuid,
        to_status: LedgerStatus,
        reason: &str,
    ) -> DbResult<EntryTransition>;

    /// Overwrite the details payload of an entry that is still pending.
    async fn update_details(&self, entry_id: Uuid, details: &Value) -> DbResult<bool>;

    /// Fetch a ledger entry by id.
    async fn find_entry(&self, entry_id: Uuid) -> DbResult<Option<LedgerEntry>>;

    /// Fetch a ledger entry by its client reference.
    async fn find_entry_by_reference(&self, reference: &str) -> DbResult<Option<LedgerEntry>>;

    /// List entries for an owner, newest first.
    async fn list_entries(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<LedgerEntry>>;

    /// List pending entries of a kind created before the cutoff, oldest first.
    async fn list_stalled_pending(
        &self,
        kind: LedgerKind,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<LedgerEntry>>;

    /// Recompute the owner's balance from the ledger alone.
    ///
    /// Completed credits add, pending and completed debits subtract. Used by
    /// reconciliation to cross-check the wallet balance column.
    async fn ledger_balance(&self, owner_id: Uuid) -> DbResult<Decimal>;
}

/// Read access to explicit vendor routing preferences.
#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// Look up the configured vendor ordering for a service and network.
    async fn find_route(
        &self,
        service_type: ServiceType,
        network: &str,
    ) -> DbResult<Option<ServiceRoute>>;
}

/// Read access to vendor configuration rows.
#[async_trait]
pub trait VendorConfigStore: Send + Sync {
    /// All vendor configs, enabled or not.
    async fn list_all(&self) -> DbResult<Vec<VendorConfig>>;

    /// Enabled vendors supporting a service, ordered by priority then id.
    async fn list_enabled_for(&self, service_type: ServiceType) -> DbResult<Vec<VendorConfig>>;

    /// Fetch one vendor config by its adapter id.
    async fn find_by_adapter_id(&self, adapter_id: &str) -> DbResult<Option<VendorConfig>>;
}

/// Referral earning storage.
#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Record a commission for a referred user's first completed purchase.
    ///
    /// Returns `None` when an earning already exists for the referred user;
    /// the one-earning-per-referred-user constraint makes this idempotent.
    async fn record_earning(&self, earning: &NewReferralEarning)
        -> DbResult<Option<ReferralEarning>>;

    /// List earnings recorded for a referrer, newest first.
    async fn list_earnings(&self, referrer_id: Uuid, limit: i64) -> DbResult<Vec<ReferralEarning>>;

    /// Move every pending earning for the referrer to withdrawn and credit the
    /// summed amount to their wallet, in one transaction.
    ///
    /// Returns `None` when nothing was pending.
    async fn withdraw_earnings(
        &self,
        referrer_id: Uuid,
        reference: &str,
        details: &Value,
    ) -> DbResult<Option<ReferralWithdrawal>>;
}

/// Read access to user rows; the engine only needs the referral link.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> DbResult<Option<User>>;
}
