use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::db::models::OwnerId;
use crate::error::{AppError, AppResult};

pub struct LinkStateRepository;

impl LinkStateRepository {
    /// Record `nonce` as used. Returns false if it was already recorded.
    pub async fn consume(
        pool: &SqlitePool,
        nonce: &str,
        owner_id: OwnerId,
        now: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO consumed_link_states (nonce, owner_id, consumed_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(nonce) DO NOTHING
            "#,
        )
        .bind(nonce)
        .bind(owner_id)
        .bind(now)
        .bind(expires_at)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn purge_expired(pool: &SqlitePool, now: NaiveDateTime) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM consumed_link_states WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
