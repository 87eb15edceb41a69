//! Referral commissions
//!
//! A referred user's first completed purchase earns their referrer a one-time
//! commission. Earnings accrue as pending rows and only touch the wallet when
//! the referrer withdraws them.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::repository::{ReferralStore, UserStore};
use crate::error::{AppError, AppResult};
use crate::model::{
    EntryDetails, LedgerEntry, NewReferralEarning, ReferralEarning, ReferralWithdrawal,
};

#[derive(Debug, Clone)]
pub struct ReferralPolicy {
    pub first_purchase_bonus: Decimal,
    pub base_rate: Decimal,
    pub boosted_rate: Decimal,
    pub boost_threshold: Decimal,
}

impl ReferralPolicy {
    /// Commission for a qualifying purchase: flat bonus plus a slice of the
    /// purchase amount, with the better rate above the threshold.
    pub fn commission(&self, amount: Decimal) -> Decimal {
        let rate = if amount >= self.boost_threshold {
            self.boosted_rate
        } else {
            self.base_rate
        };
        (self.first_purchase_bonus + amount * rate).round_dp(2)
    }
}

pub struct ReferralEngine {
    users: Arc<dyn UserStore>,
    referrals: Arc<dyn ReferralStore>,
    policy: ReferralPolicy,
}

impl ReferralEngine {
    pub fn new(
        users: Arc<dyn UserStore>,
        referrals: Arc<dyn ReferralStore>,
        policy: ReferralPolicy,
    ) -> Self {
        Self {
            users,
            referrals,
            policy,
        }
    }

    /// Credit the referrer when a completed purchase qualifies. Returns None
    /// when the buyer was not referred or has already produced an earning.
    pub async fn on_purchase_completed(
        &self,
        entry: &LedgerEntry,
    ) -> AppResult<Option<ReferralEarning>> {
        let Some(user) = self.users.find_user(entry.owner_id).await? else {
            return Ok(None);
        };
        let Some(referrer_id) = user.referred_by else {
            return Ok(None);
        };

        let commission = self.policy.commission(entry.amount);
        if commission <= Decimal::ZERO {
            return Ok(None);
        }

        let recorded = self
            .referrals
            .record_earning(&NewReferralEarning {
                referrer_id,
                referred_user_id: entry.owner_id,
                source_entry_id: entry.id,
                amount: commission,
            })
            .await?;

        if let Some(earning) = &recorded {
            info!(
                "Referral earning of {} recorded for {} from purchase {}",
                earning.amount, earning.referrer_id, entry.reference
            );
        }
        Ok(recorded)
    }

    pub async fn earnings(
        &self,
        referrer_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<ReferralEarning>> {
        Ok(self.referrals.list_earnings(referrer_id, limit).await?)
    }

    /// Sweep all pending earnings into the referrer's wallet as one credit.
    pub async fn withdraw(&self, referrer_id: Uuid) -> AppResult<ReferralWithdrawal> {
        let reference = format!("refwd_{}", Uuid::new_v4().simple());
        let details = EntryDetails::adjustment(
            "referral_engine",
            Some("referral earnings withdrawal".to_string()),
        )
        .to_value();

        match self
            .referrals
            .withdraw_earnings(referrer_id, &reference, &details)
            .await?
        {
            Some(withdrawal) => {
                info!(
                    "Referral withdrawal of {} ({} earnings) for {}",
                    withdrawal.amount, withdrawal.entries_settled, referrer_id
                );
                Ok(withdrawal)
            }
            None => Err(AppError::NotFound(
                "no pending referral earnings".to_string(),
            )),
        }
    }
}
