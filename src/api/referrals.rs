use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::api::purchases::EntryView;
use crate::api::AppState;
use crate::error::AppResult;
use crate::model::ReferralEarning;

const EARNINGS_PAGE_SIZE: i64 = 50;

pub async fn list_earnings(
    State(state): State<AppState>,
    Path(referrer_id): Path<Uuid>,
) -> AppResult<Json<Vec<ReferralEarning>>> {
    let earnings = state
        .referral
        .earnings(referrer_id, EARNINGS_PAGE_SIZE)
        .await?;
    Ok(Json(earnings))
}

#[derive(Debug, Serialize)]
pub struct WithdrawalView {
    pub amount: Decimal,
    pub entries_settled: i64,
    pub ledger_entry: EntryView,
}

pub async fn withdraw(
    State(state): State<AppState>,
    Path(referrer_id): Path<Uuid>,
) -> AppResult<Json<WithdrawalView>> {
    let withdrawal = state.referral.withdraw(referrer_id).await?;
    Ok(Json(WithdrawalView {
        amount: withdrawal.amount,
        entries_settled: withdrawal.entries_settled,
        ledger_entry: EntryView::from(withdrawal.ledger_entry),
    }))
}
