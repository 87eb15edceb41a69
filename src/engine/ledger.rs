//! Wallet ledger facade
//!
//! Thin domain layer over the wallet store. Validates intents before they
//! reach SQL and translates storage errors into the API error vocabulary,
//! most importantly the insufficient-balance case.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::error::DatabaseErrorKind;
use crate::database::repository::WalletStore;
use crate::error::{AppError, AppResult};
use crate::model::{
    EntryDetails, EntryTransition, FinalizeMeta, LedgerEntry, LedgerKind, LedgerStatus,
    NewLedgerEntry, ReserveOutcome, Wallet,
};

pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    pub async fn wallet(&self, owner_id: Uuid) -> AppResult<Wallet> {
        Ok(self.store.ensure_wallet(owner_id).await?)
    }

    /// Hold funds for a purchase: balance moves now, the entry stays pending
    /// until dispatch settles it. Replays of a known reference come back as
    /// `ReserveOutcome::Replayed` even when the balance could not cover a
    /// fresh charge.
    pub async fn reserve(&self, entry: &NewLedgerEntry) -> AppResult<ReserveOutcome> {
        if entry.amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        if !entry.kind.is_debit() {
            return Err(AppError::Validation(format!(
                "cannot reserve with credit kind '{}'",
                entry.kind
            )));
        }

        match self.store.reserve_debit(entry).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => match &e.kind {
                DatabaseErrorKind::InsufficientBalance {
                    available,
                    required,
                } => Err(AppError::InsufficientFunds {
                    available: available.clone(),
                    required: required.clone(),
                }),
                _ => Err(e.into()),
            },
        }
    }

    /// Settle a credit immediately (funding, admin credit, refund rows).
    /// Idempotent by reference like reserve.
    pub async fn credit(&self, entry: &NewLedgerEntry) -> AppResult<ReserveOutcome> {
        if entry.amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        if !entry.kind.is_credit() {
            return Err(AppError::Validation(format!(
                "cannot credit with debit kind '{}'",
                entry.kind
            )));
        }
        Ok(self.store.settle_credit(entry).await?)
    }

    /// Settle a debit immediately (admin debits). The balance invariant
    /// still applies: an uncovered amount fails with `InsufficientFunds`.
    pub async fn debit(&self, entry: &NewLedgerEntry) -> AppResult<ReserveOutcome> {
        if entry.amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        if !entry.kind.is_debit() {
            return Err(AppError::Validation(format!(
                "cannot debit with credit kind '{}'",
                entry.kind
            )));
        }

        match self.store.settle_debit(entry).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => match &e.kind {
                DatabaseErrorKind::InsufficientBalance {
                    available,
                    required,
                } => Err(AppError::InsufficientFunds {
                    available: available.clone(),
                    required: required.clone(),
                }),
                _ => Err(e.into()),
            },
        }
    }

    pub async fn finalize(
        &self,
        entry_id: Uuid,
        meta: &FinalizeMeta,
    ) -> AppResult<EntryTransition> {
        Ok(self.store.finalize_entry(entry_id, meta).await?)
    }

    /// Fail a pending purchase and put the held funds back.
    pub async fn compensate(&self, entry_id: Uuid, reason: &str) -> AppResult<EntryTransition> {
        Ok(self
            .store
            .refund_entry(entry_id, LedgerStatus::Failed, reason)
            .await?)
    }

    /// Reverse a stalled purchase from the reconciliation sweep.
    pub async fn reverse(&self, entry_id: Uuid, reason: &str) -> AppResult<EntryTransition> {
        Ok(self
            .store
            .refund_entry(entry_id, LedgerStatus::Reversed, reason)
            .await?)
    }

    /// Persist the dispatch attempt trail into the entry details. Returns
    /// false once the entry has left pending, at which point the trail is
    /// frozen.
    pub async fn record_attempts(&self, entry_id: Uuid, details: &EntryDetails) -> AppResult<bool> {
        let value = details.to_value();
        Ok(self.store.update_details(entry_id, &value).await?)
    }

    pub async fn entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        Ok(self.store.find_entry(entry_id).await?)
    }

    pub async fn entry_by_reference(&self, reference: &str) -> AppResult<Option<LedgerEntry>> {
        Ok(self.store.find_entry_by_reference(reference).await?)
    }

    pub async fn history(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<LedgerEntry>> {
        Ok(self.store.list_entries(owner_id, limit, offset).await?)
    }

    /// Balance derived from the entries alone, for drift checks against the
    /// stored wallet balance.
    pub async fn reconstruct_balance(&self, owner_id: Uuid) -> AppResult<Decimal> {
        Ok(self.store.ledger_balance(owner_id).await?)
    }

    pub async fn stalled_purchases(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> AppResult<Vec<LedgerEntry>> {
        Ok(self
            .store
            .list_stalled_pending(LedgerKind::Purchase, cutoff, limit)
            .await?)
    }
}
