use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::WalletStore;
use crate::model::{
    EntryTransition, FinalizeMeta, LedgerEntry, LedgerKind, LedgerStatus, NewLedgerEntry,
    ReserveOutcome, Wallet,
};

#[cfg(feature = "cache")]
use crate::cache::{cache::ttl, keys::wallet::BalanceKey, Cache, RedisCache};
#[cfg(feature = "cache")]
use tracing::debug;

/// Postgres-backed wallet and ledger store.
///
/// Balance mutations and their ledger rows always share one transaction, so
/// a crash can never leave a debited wallet without an entry or vice versa.
/// The unique index on `ledger_entries.reference` is what makes every write
/// idempotent: a second insert with the same reference rolls the whole
/// transaction back and the original entry is returned instead.
pub struct PgWalletStore {
    pool: PgPool,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
}

impl PgWalletStore {
    /// Create a new store without caching
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            #[cfg(feature = "cache")]
            cache: None,
        }
    }

    /// Create a new store with Redis caching enabled
    #[cfg(feature = "cache")]
    pub fn with_cache(pool: PgPool, cache: RedisCache) -> Self {
        Self {
            pool,
            cache: Some(cache),
        }
    }

    /// Enable caching for an existing store
    #[cfg(feature = "cache")]
    pub fn enable_cache(&mut self, cache: RedisCache) {
        self.cache = Some(cache);
    }

    #[cfg(feature = "cache")]
    async fn invalidate_wallet(&self, owner_id: Uuid) {
        if let Some(ref cache) = self.cache {
            let key = BalanceKey::new(owner_id).to_string();
            if let Err(e) = <RedisCache as Cache<Wallet>>::delete(cache, &key).await {
                debug!("Failed to invalidate wallet cache for {}: {}", owner_id, e);
            } else {
                debug!("Invalidated wallet cache: {}", owner_id);
            }
        }
    }

    async fn insert_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new_entry: &NewLedgerEntry,
        status: LedgerStatus,
    ) -> DbResult<LedgerEntry> {
        sqlx::query_as::<_, LedgerEntry>(
            "INSERT INTO ledger_entries
                 (id, owner_id, kind, status, amount, reference, service_type, network,
                  selling_price, details, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
             RETURNING id, owner_id, kind, status, amount, reference, service_type, network,
                       vendor_name, vendor_reference, cost_price, selling_price, profit,
                       details, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(new_entry.owner_id)
        .bind(new_entry.kind.as_str())
        .bind(status.as_str())
        .bind(new_entry.amount)
        .bind(&new_entry.reference)
        .bind(new_entry.service_type.map(|s| s.as_str()))
        .bind(&new_entry.network)
        .bind(new_entry.selling_price)
        .bind(&new_entry.details)
        .fetch_one(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Shared path for balance-guarded debits. `reserve_debit` leaves the
    /// entry pending, `settle_debit` completes it in the same step.
    async fn debit_with_status(
        &self,
        new_entry: &NewLedgerEntry,
        status: LedgerStatus,
    ) -> DbResult<ReserveOutcome> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT user_id, balance, created_at, updated_at
             FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(new_entry.owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Wallet", new_entry.owner_id))?;

        if wallet.balance < new_entry.amount {
            // A retry of an already-charged reference must replay, not fail,
            // even though the first charge lowered the balance.
            drop(tx);
            if let Some(existing) = self.find_entry_by_reference(&new_entry.reference).await? {
                return Ok(ReserveOutcome::Replayed(existing));
            }
            return Err(
                DatabaseError::insufficient_balance(wallet.balance, new_entry.amount)
                    .with_context(format!("debiting for '{}'", new_entry.reference)),
            );
        }

        sqlx::query(
            "UPDATE wallets SET balance = balance - $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(new_entry.amount)
        .bind(new_entry.owner_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match self.insert_entry(&mut tx, new_entry, status).await {
            Ok(entry) => {
                tx.commit().await.map_err(DatabaseError::from_sqlx)?;
                #[cfg(feature = "cache")]
                self.invalidate_wallet(new_entry.owner_id).await;
                Ok(ReserveOutcome::Created(entry))
            }
            Err(e) if e.is_unique_violation() => {
                // Reference already used: roll back the debit and hand back
                // the original entry untouched.
                drop(tx);
                let existing = self
                    .find_entry_by_reference(&new_entry.reference)
                    .await?
                    .ok_or_else(|| {
                        DatabaseError::not_found("LedgerEntry", &new_entry.reference)
                    })?;
                Ok(ReserveOutcome::Replayed(existing))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn find_wallet(&self, owner_id: Uuid) -> DbResult<Option<Wallet>> {
        #[cfg(feature = "cache")]
        if let Some(ref cache) = self.cache {
            let key = BalanceKey::new(owner_id).to_string();
            if let Ok(Some(cached)) = <RedisCache as Cache<Wallet>>::get(cache, &key).await {
                debug!("Cache hit for wallet: {}", owner_id);
                return Ok(Some(cached));
            }
        }

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT user_id, balance, created_at, updated_at
             FROM wallets WHERE user_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        #[cfg(feature = "cache")]
        if let (Some(ref cache), Some(ref found)) = (&self.cache, &wallet) {
            let key = BalanceKey::new(owner_id).to_string();
            if let Err(e) = cache.set(&key, found, Some(ttl::WALLET_BALANCES)).await {
                debug!("Failed to cache wallet {}: {}", owner_id, e);
            }
        }

        Ok(wallet)
    }

    async fn ensure_wallet(&self, owner_id: Uuid) -> DbResult<Wallet> {
        sqlx::query(
            "INSERT INTO wallets (user_id, balance, created_at, updated_at)
             VALUES ($1, 0, NOW(), NOW())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query_as::<_, Wallet>(
            "SELECT user_id, balance, created_at, updated_at
             FROM wallets WHERE user_id = $1",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn reserve_debit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome> {
        self.debit_with_status(new_entry, LedgerStatus::Pending)
            .await
    }

    async fn settle_credit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO wallets (user_id, balance, created_at, updated_at)
             VALUES ($1, 0, NOW(), NOW())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(new_entry.owner_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "UPDATE wallets SET balance = balance + $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(new_entry.amount)
        .bind(new_entry.owner_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match self
            .insert_entry(&mut tx, new_entry, LedgerStatus::Completed)
            .await
        {
            Ok(entry) => {
                tx.commit().await.map_err(DatabaseError::from_sqlx)?;
                #[cfg(feature = "cache")]
                self.invalidate_wallet(new_entry.owner_id).await;
                Ok(ReserveOutcome::Created(entry))
            }
            Err(e) if e.is_unique_violation() => {
                drop(tx);
                let existing = self
                    .find_entry_by_reference(&new_entry.reference)
                    .await?
                    .ok_or_else(|| {
                        DatabaseError::not_found("LedgerEntry", &new_entry.reference)
                    })?;
                Ok(ReserveOutcome::Replayed(existing))
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_debit(&self, new_entry: &NewLedgerEntry) -> DbResult<ReserveOutcome> {
        self.debit_with_status(new_entry, LedgerStatus::Completed)
            .await
    }

    async fn finalize_entry(
        &self,
        entry_id: Uuid,
        meta: &FinalizeMeta,
    ) -> DbResult<EntryTransition> {
        let updated = sqlx::query_as::<_, LedgerEntry>(
            "UPDATE ledger_entries
             SET status = 'completed',
                 vendor_name = $2,
                 vendor_reference = $3,
                 cost_price = $4,
                 profit = CASE
                     WHEN $4::numeric IS NOT NULL AND selling_price IS NOT NULL
                     THEN selling_price - $4::numeric
                     ELSE profit
                 END,
                 details = COALESCE($5, details),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING id, owner_id, kind, status, amount, reference, service_type, network,
                       vendor_name, vendor_reference, cost_price, selling_price, profit,
                       details, created_at, updated_at",
        )
        .bind(entry_id)
        .bind(&meta.vendor_name)
        .bind(&meta.vendor_reference)
        .bind(meta.cost_price)
        .bind(&meta.details)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(entry) => Ok(EntryTransition::Applied(entry)),
            None => {
                let current = self
                    .find_entry(entry_id)
                    .await?
                    .ok_or_else(|| DatabaseError::not_found("LedgerEntry", entry_id))?;
                Ok(EntryTransition::AlreadySettled(current))
            }
        }
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

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Only entries created by reserve_debit are ever pending, so the
        // status guard doubles as a debit-kind guard.
        let updated = sqlx::query_as::<_, LedgerEntry>(
            "UPDATE ledger_entries
             SET status = $2,
                 details = jsonb_set(COALESCE(details, '{}'::jsonb),
                                     '{failure_reason}', to_jsonb($3::text), true),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING id, owner_id, kind, status, amount, reference, service_type, network,
                       vendor_name, vendor_reference, cost_price, selling_price, profit,
                       details, created_at, updated_at",
        )
        .bind(entry_id)
        .bind(to_status.as_str())
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(entry) => {
                sqlx::query(
                    "UPDATE wallets SET balance = balance + $1, updated_at = NOW()
                     WHERE user_id = $2",
                )
                .bind(entry.amount)
                .bind(entry.owner_id)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

                tx.commit().await.map_err(DatabaseError::from_sqlx)?;
                #[cfg(feature = "cache")]
                self.invalidate_wallet(entry.owner_id).await;
                Ok(EntryTransition::Applied(entry))
            }
            None => {
                drop(tx);
                let current = self
                    .find_entry(entry_id)
                    .await?
                    .ok_or_else(|| DatabaseError::not_found("LedgerEntry", entry_id))?;
                Ok(EntryTransition::AlreadySettled(current))
            }
        }
    }

    async fn update_details(&self, entry_id: Uuid, details: &Value) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE ledger_entries SET details = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(entry_id)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_entry(&self, entry_id: Uuid) -> DbResult<Option<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT id, owner_id, kind, status, amount, reference, service_type, network,
                    vendor_name, vendor_reference, cost_price, selling_price, profit,
                    details, created_at, updated_at
             FROM ledger_entries WHERE id = $1",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_entry_by_reference(&self, reference: &str) -> DbResult<Option<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT id, owner_id, kind, status, amount, reference, service_type, network,
                    vendor_name, vendor_reference, cost_price, selling_price, profit,
                    details, created_at, updated_at
             FROM ledger_entries WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_entries(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT id, owner_id, kind, status, amount, reference, service_type, network,
                    vendor_name, vendor_reference, cost_price, selling_price, profit,
                    details, created_at, updated_at
             FROM ledger_entries WHERE owner_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_stalled_pending(
        &self,
        kind: LedgerKind,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT id, owner_id, kind, status, amount, reference, service_type, network,
                    vendor_name, vendor_reference, cost_price, selling_price, profit,
                    details, created_at, updated_at
             FROM ledger_entries
             WHERE kind = $1 AND status = 'pending' AND created_at < $2
             ORDER BY created_at ASC
             LIMIT $3",
        )
        .bind(kind.as_str())
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn ledger_balance(&self, owner_id: Uuid) -> DbResult<Decimal> {
        let row: (Decimal,) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE
                 WHEN kind IN ('wallet_funding', 'admin_credit', 'refund')
                      AND status = 'completed' THEN amount
                 WHEN kind IN ('purchase', 'admin_debit')
                      AND status IN ('pending', 'completed') THEN -amount
                 ELSE 0
             END), 0::numeric)
             FROM ledger_entries WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryDetails, ServiceType};
    use rust_decimal_macros::dec;

    async fn store() -> PgWalletStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::database::init_pool(&url, None)
            .await
            .expect("Failed to init DB pool");
        PgWalletStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn reserve_then_replay_by_reference() {
        let store = store().await;
        let owner = Uuid::new_v4();
        store.ensure_wallet(owner).await.unwrap();
        store
            .settle_credit(&NewLedgerEntry::credit(
                owner,
                LedgerKind::WalletFunding,
                dec!(1000),
                format!("fund_{}", Uuid::new_v4().simple()),
                EntryDetails::funding("paystack", "seed", None).to_value(),
            ))
            .await
            .unwrap();

        let reference = format!("pur_{}", Uuid::new_v4().simple());
        let entry = NewLedgerEntry::purchase(
            owner,
            dec!(400),
            reference.clone(),
            ServiceType::Data,
            "mtn".to_string(),
            serde_json::json!({}),
        );

        let first = store.reserve_debit(&entry).await.unwrap();
        assert!(!first.is_replay());
        let second = store.reserve_debit(&entry).await.unwrap();
        assert!(second.is_replay());
        assert_eq!(second.entry().id, first.entry().id);

        let wallet = store.find_wallet(owner).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(600));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn ledger_balance_matches_wallet_after_refund() {
        let store = store().await;
        let owner = Uuid::new_v4();
        store.ensure_wallet(owner).await.unwrap();
        store
            .settle_credit(&NewLedgerEntry::credit(
                owner,
                LedgerKind::WalletFunding,
                dec!(500),
                format!("fund_{}", Uuid::new_v4().simple()),
                EntryDetails::funding("paystack", "seed", None).to_value(),
            ))
            .await
            .unwrap();

        let reserved = store
            .reserve_debit(&NewLedgerEntry::purchase(
                owner,
                dec!(300),
                format!("pur_{}", Uuid::new_v4().simple()),
                ServiceType::Airtime,
                "glo".to_string(),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        store
            .refund_entry(reserved.entry().id, LedgerStatus::Failed, "vendor rejected")
            .await
            .unwrap();

        let wallet = store.find_wallet(owner).await.unwrap().unwrap();
        let ledger = store.ledger_balance(owner).await.unwrap();
        assert_eq!(wallet.balance, ledger);
        assert_eq!(wallet.balance, dec!(500));
    }
}
