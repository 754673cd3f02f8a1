use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// OAuth Credential Repository
// ============================================================================

const CREDENTIAL_COLUMNS: &str = r#"
    owner_id, external_account_id, display_name,
    access_token, refresh_token, version, authenticated_at,
    created_at, updated_at, expires_at
"#;

pub struct CredentialRepository;

impl CredentialRepository {
    /// Insert or replace the bundle for `owner_id` and push its expiry out to `expires_at`.
    ///
    /// A missing refresh token keeps the previously stored one (Google only issues it on
    /// first consent) unless the previous row had already expired.
    pub async fn upsert(
        pool: &SqlitePool,
        owner_id: OwnerId,
        profile: &CredentialProfile,
        now: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> AppResult<OAuthCredential> {
        let sql = format!(
            r#"
            INSERT INTO oauth_credentials (
                owner_id, external_account_id, display_name,
                access_token, refresh_token, version, authenticated_at,
                created_at, updated_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, 0, NULL, ?, ?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET
                external_account_id = excluded.external_account_id,
                display_name = excluded.display_name,
                access_token = excluded.access_token,
                refresh_token = CASE
                    WHEN oauth_credentials.expires_at <= excluded.updated_at THEN excluded.refresh_token
                    ELSE COALESCE(excluded.refresh_token, oauth_credentials.refresh_token)
                END,
                version = oauth_credentials.version + 1,
                authenticated_at = CASE
                    WHEN oauth_credentials.expires_at <= excluded.updated_at THEN NULL
                    ELSE oauth_credentials.authenticated_at
                END,
                created_at = CASE
                    WHEN oauth_credentials.expires_at <= excluded.updated_at THEN excluded.created_at
                    ELSE oauth_credentials.created_at
                END,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );

        sqlx::query_as::<_, OAuthCredential>(&sql)
            .bind(owner_id)
            .bind(&profile.external_account_id)
            .bind(&profile.display_name)
            .bind(&profile.access_token)
            .bind(&profile.refresh_token)
            .bind(now)
            .bind(now)
            .bind(expires_at)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Fetch the bundle for `owner_id` if it has not expired at `now`.
    pub async fn find_live(
        pool: &SqlitePool,
        owner_id: OwnerId,
        now: NaiveDateTime,
    ) -> AppResult<Option<OAuthCredential>> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM oauth_credentials WHERE owner_id = ? AND expires_at > ?"
        );

        sqlx::query_as::<_, OAuthCredential>(&sql)
            .bind(owner_id)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Conditionally replace tokens. Applies only when the row is still at
    /// `expected_version`; returns whether the write happened.
    ///
    /// `None` leaves the corresponding token untouched.
    pub async fn compare_and_set_tokens(
        pool: &SqlitePool,
        owner_id: OwnerId,
        expected_version: i64,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        now: NaiveDateTime,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_credentials
            SET
                access_token = COALESCE(?, access_token),
                refresh_token = COALESCE(?, refresh_token),
                version = version + 1,
                updated_at = ?
            WHERE owner_id = ? AND version = ? AND expires_at > ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(now)
        .bind(owner_id)
        .bind(expected_version)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Stamp `authenticated_at` on a live row. Returns false when no live row exists.
    pub async fn mark_authenticated(
        pool: &SqlitePool,
        owner_id: OwnerId,
        now: NaiveDateTime,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_credentials
            SET authenticated_at = COALESCE(authenticated_at, ?)
            WHERE owner_id = ? AND expires_at > ?
            "#,
        )
        .bind(now)
        .bind(owner_id)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn is_authenticated(
        pool: &SqlitePool,
        owner_id: OwnerId,
        now: NaiveDateTime,
    ) -> AppResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT owner_id FROM oauth_credentials
            WHERE owner_id = ? AND authenticated_at IS NOT NULL AND expires_at > ?
            "#,
        )
        .bind(owner_id)
        .bind(now)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(found.is_some())
    }

    /// Returns true if a row was removed.
    pub async fn delete(pool: &SqlitePool, owner_id: OwnerId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM oauth_credentials WHERE owner_id = ?")
            .bind(owner_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_expired_for(
        pool: &SqlitePool,
        owner_id: OwnerId,
        now: NaiveDateTime,
    ) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM oauth_credentials WHERE owner_id = ? AND expires_at <= ?")
                .bind(owner_id)
                .bind(now)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn purge_expired(pool: &SqlitePool, now: NaiveDateTime) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_credentials WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
