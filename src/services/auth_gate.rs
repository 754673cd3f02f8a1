use chrono::Utc;

use crate::db::{CredentialRepository, OwnerId};
use crate::error::{AppError, AppResult};
use crate::services::credentials::CredentialStore;

/// Answers "has this Telegram user linked a calendar?" before any extraction runs.
///
/// The answer is read from the durable credential row (`authenticated_at` on a live
/// record), so it survives restarts and cannot drift from the stored credentials.
#[derive(Clone)]
pub struct AuthGate {
    store: CredentialStore,
}

impl AuthGate {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    pub async fn is_authenticated(&self, owner_id: OwnerId) -> bool {
        let Some(pool) = self.store.database().pool().await else {
            tracing::warn!(
                "Credential store not connected; owner {} treated as unauthenticated",
                owner_id
            );
            return false;
        };

        match CredentialRepository::is_authenticated(&pool, owner_id, Utc::now().naive_utc()).await
        {
            Ok(authenticated) => authenticated,
            Err(e) => {
                tracing::warn!(
                    "Failed to check authentication for owner {}: {:?}",
                    owner_id,
                    e
                );
                false
            }
        }
    }

    /// Flag the owner as authenticated. Only valid once `CredentialStore::store` has
    /// returned successfully for this owner; fails with `NotFound` otherwise.
    pub async fn mark_authenticated(&self, owner_id: OwnerId) -> AppResult<()> {
        let pool = self
            .store
            .database()
            .pool()
            .await
            .ok_or(AppError::StoreUnavailable)?;

        if CredentialRepository::mark_authenticated(&pool, owner_id, Utc::now().naive_utc())
            .await?
        {
            tracing::info!("User {} marked as authenticated", owner_id);
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "No stored credentials for owner {}",
                owner_id
            )))
        }
    }

    /// Clear authentication by dropping the credential bundle behind it.
    pub async fn revoke(&self, owner_id: OwnerId) -> AppResult<()> {
        self.store.delete(owner_id).await?;
        tracing::info!("User {} removed from authenticated users", owner_id);
        Ok(())
    }
}
