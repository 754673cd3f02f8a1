use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// OAuth Credential Models
// ============================================================================

/// Telegram user id. Primary key for credentials, drafts and authentication state.
pub type OwnerId = i64;

/// Stored Google credential bundle for one Telegram user.
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct OAuthCredential {
    pub owner_id: OwnerId,
    pub external_account_id: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Bumped on every write; token rotation only applies against the version it read.
    pub version: i64,
    pub authenticated_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl std::fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredential")
            .field("owner_id", &self.owner_id)
            .field("external_account_id", &self.external_account_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("version", &self.version)
            .field("authenticated_at", &self.authenticated_at)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Profile handed over by a completed Google authorization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialProfile {
    pub external_account_id: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for CredentialProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProfile")
            .field("external_account_id", &self.external_account_id)
            .field("display_name", &self.display_name)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}
