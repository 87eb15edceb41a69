use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::UserStore;
use crate::model::User;

/// Postgres-backed user lookup. Read-only; account management is owned by a
/// separate service and this engine only follows the referral link.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user(&self, user_id: Uuid) -> DbResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, referred_by, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
