use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::ReferralStore;
use crate::model::{
    LedgerEntry, LedgerKind, LedgerStatus, NewReferralEarning, ReferralEarning, ReferralWithdrawal,
};

/// Postgres-backed referral earning store.
pub struct PgReferralStore {
    pool: PgPool,
}

impl PgReferralStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralStore for PgReferralStore {
    async fn record_earning(
        &self,
        earning: &NewReferralEarning,
    ) -> DbResult<Option<ReferralEarning>> {
        // The unique index on referred_user_id enforces one commission per
        // referred user no matter how often completion hooks fire.
        sqlx::query_as::<_, ReferralEarning>(
            "INSERT INTO referral_earnings
                 (id, referrer_id, referred_user_id, source_entry_id, amount, status, created_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', NOW())
             ON CONFLICT (referred_user_id) DO NOTHING
             RETURNING id, referrer_id, referred_user_id, source_entry_id, amount, status,
                       created_at, withdrawn_at",
        )
        .bind(Uuid::new_v4())
        .bind(earning.referrer_id)
        .bind(earning.referred_user_id)
        .bind(earning.source_entry_id)
        .bind(earning.amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_earnings(
        &self,
        referrer_id: Uuid,
        limit: i64,
    ) -> DbResult<Vec<ReferralEarning>> {
        sqlx::query_as::<_, ReferralEarning>(
            "SELECT id, referrer_id, referred_user_id, source_entry_id, amount, status,
                    created_at, withdrawn_at
             FROM referral_earnings WHERE referrer_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(referrer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn withdraw_earnings(
        &self,
        referrer_id: Uuid,
        reference: &str,
        details: &Value,
    ) -> DbResult<Option<ReferralWithdrawal>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let settled = sqlx::query_as::<_, ReferralEarning>(
            "UPDATE referral_earnings
             SET status = 'withdrawn', withdrawn_at = NOW()
             WHERE referrer_id = $1 AND status = 'pending'
             RETURNING id, referrer_id, referred_user_id, source_entry_id, amount, status,
                       created_at, withdrawn_at",
        )
        .bind(referrer_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if settled.is_empty() {
            return Ok(None);
        }

        let total: Decimal = settled.iter().map(|e| e.amount).sum();

        sqlx::query(
            "INSERT INTO wallets (user_id, balance, created_at, updated_at)
             VALUES ($1, 0, NOW(), NOW())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(referrer_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "UPDATE wallets SET balance = balance + $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(total)
        .bind(referrer_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let entry = sqlx::query_as::<_, LedgerEntry>(
            "INSERT INTO ledger_entries
                 (id, owner_id, kind, status, amount, reference, details, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
             RETURNING id, owner_id, kind, status, amount, reference, service_type, network,
                       vendor_name, vendor_reference, cost_price, selling_price, profit,
                       details, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(referrer_id)
        .bind(LedgerKind::AdminCredit.as_str())
        .bind(LedgerStatus::Completed.as_str())
        .bind(total)
        .bind(reference)
        .bind(details)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(Some(ReferralWithdrawal {
            amount: total,
            entries_settled: settled.len() as i64,
            ledger_entry: entry,
        }))
    }
}
