use chrono::{Duration, NaiveDateTime, Utc};

use crate::db::{CredentialProfile, CredentialRepository, Database, OAuthCredential, OwnerId};
use crate::error::{AppError, AppResult};

/// How many times a token rotation re-reads and retries after losing a version race.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Result of a credential read. Misses and an unreachable store are kept apart so
/// callers can decide whether to warn, but both mean "not authenticated".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialLookup {
    Found(OAuthCredential),
    NotFound,
    Unavailable,
}

impl CredentialLookup {
    pub fn into_option(self) -> Option<OAuthCredential> {
        match self {
            CredentialLookup::Found(c) => Some(c),
            CredentialLookup::NotFound | CredentialLookup::Unavailable => None,
        }
    }
}

/// Durable, keyed, TTL'd storage of Google credential bundles, one per Telegram user.
///
/// Mutations fail with `AppError::StoreUnavailable` while the database is not
/// connected; reads degrade to `CredentialLookup::Unavailable`.
#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
    ttl: Duration,
}

impl CredentialStore {
    pub fn new(db: Database, ttl_days: i64) -> Self {
        Self {
            db,
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    async fn pool(&self) -> AppResult<sqlx::SqlitePool> {
        self.db.pool().await.ok_or(AppError::StoreUnavailable)
    }

    /// Upsert the bundle and restart its retention window.
    pub async fn store(
        &self,
        owner_id: OwnerId,
        profile: &CredentialProfile,
    ) -> AppResult<OAuthCredential> {
        if profile.external_account_id.trim().is_empty() || profile.access_token.is_empty() {
            return Err(AppError::Validation(
                "Credential requires an account id and an access token".to_string(),
            ));
        }

        let pool = self.pool().await?;
        let now = Self::now();
        let credential =
            CredentialRepository::upsert(&pool, owner_id, profile, now, now + self.ttl).await?;
        tracing::info!(
            "Stored credentials for owner {} (account {}), expires at {}",
            owner_id,
            credential.external_account_id,
            credential.expires_at
        );
        Ok(credential)
    }

    pub async fn get(&self, owner_id: OwnerId) -> CredentialLookup {
        let Some(pool) = self.db.pool().await else {
            tracing::warn!(
                "Credential store not connected; treating owner {} as unauthenticated",
                owner_id
            );
            return CredentialLookup::Unavailable;
        };

        let now = Self::now();
        match CredentialRepository::find_live(&pool, owner_id, now).await {
            Ok(Some(credential)) => CredentialLookup::Found(credential),
            Ok(None) => {
                // Lazily drop a row that outlived its retention window.
                match CredentialRepository::delete_expired_for(&pool, owner_id, now).await {
                    Ok(true) => tracing::info!("Removed expired credentials for owner {}", owner_id),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(
                        "Failed to remove expired credentials for owner {}: {:?}",
                        owner_id,
                        e
                    ),
                }
                CredentialLookup::NotFound
            }
            Err(e) => {
                tracing::warn!("Failed to read credentials for owner {}: {:?}", owner_id, e);
                CredentialLookup::Unavailable
            }
        }
    }

    /// Replace the stored refresh token. Safe against concurrent rotations for the same owner.
    pub async fn update_refresh_token(&self, owner_id: OwnerId, new_token: &str) -> AppResult<()> {
        self.swap_tokens(owner_id, None, Some(new_token)).await?;
        Ok(())
    }

    /// Store a freshly refreshed access token, plus the rotated refresh token when the
    /// provider issued one.
    pub async fn rotate_tokens(
        &self,
        owner_id: OwnerId,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> AppResult<OAuthCredential> {
        self.swap_tokens(owner_id, Some(access_token), refresh_token)
            .await
    }

    async fn swap_tokens(
        &self,
        owner_id: OwnerId,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> AppResult<OAuthCredential> {
        let pool = self.pool().await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let now = Self::now();
            let current = CredentialRepository::find_live(&pool, owner_id, now)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("No stored credentials for owner {}", owner_id))
                })?;

            let applied = CredentialRepository::compare_and_set_tokens(
                &pool,
                owner_id,
                current.version,
                access_token,
                refresh_token,
                now,
            )
            .await?;

            if applied {
                tracing::debug!(
                    "Rotated tokens for owner {} (version {} -> {})",
                    owner_id,
                    current.version,
                    current.version + 1
                );
                return CredentialRepository::find_live(&pool, owner_id, Self::now())
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("No stored credentials for owner {}", owner_id))
                    });
            }

            tracing::debug!(
                "Token rotation for owner {} lost a version race (attempt {})",
                owner_id,
                attempt
            );
            tokio::task::yield_now().await;
        }

        Err(AppError::Conflict(format!(
            "Token rotation for owner {} did not settle after {} attempts",
            owner_id, MAX_CAS_ATTEMPTS
        )))
    }

    /// Remove the bundle. Deleting a missing bundle is not an error.
    pub async fn delete(&self, owner_id: OwnerId) -> AppResult<()> {
        let pool = self.pool().await?;
        if CredentialRepository::delete(&pool, owner_id).await? {
            tracing::info!("Deleted credentials for owner {}", owner_id);
        }
        Ok(())
    }

    pub async fn purge_expired(&self) -> AppResult<u64> {
        let pool = self.pool().await?;
        CredentialRepository::purge_expired(&pool, Self::now()).await
    }
}
