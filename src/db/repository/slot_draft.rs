use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

pub struct SlotDraftRepository;

impl SlotDraftRepository {
    pub async fn find_live(
        pool: &SqlitePool,
        owner_id: OwnerId,
        now: NaiveDateTime,
    ) -> AppResult<Option<SlotDraft>> {
        sqlx::query_as::<_, SlotDraft>(
            r#"
            SELECT slots_json
            FROM slot_drafts
            WHERE owner_id = ? AND expires_at > ?
            "#,
        )
        .bind(owner_id)
        .bind(now)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn upsert(
        pool: &SqlitePool,
        owner_id: OwnerId,
        slots_json: &str,
        now: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO slot_drafts (owner_id, slots_json, updated_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET
                slots_json = excluded.slots_json,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(owner_id)
        .bind(slots_json)
        .bind(now)
        .bind(expires_at)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Returns true if a live or expired draft was removed.
    pub async fn delete(pool: &SqlitePool, owner_id: OwnerId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM slot_drafts WHERE owner_id = ?")
            .bind(owner_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn purge_expired(pool: &SqlitePool, now: NaiveDateTime) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM slot_drafts WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
