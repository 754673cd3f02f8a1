use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::{CredentialProfile, Database, LinkStateRepository, OwnerId};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::auth_gate::AuthGate;
use crate::services::credentials::CredentialStore;
use crate::AppState;

/// Signed `state` parameter of the Google consent round trip. Binds the callback to
/// the Telegram user who asked for the link. The nonce makes each state single-use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    pub owner_id: OwnerId,
    pub nonce: String,
    pub lang: Option<String>,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Credential stored and the owner marked authenticated.
    Linked,
    /// Google accepted the consent but the credential could not be saved.
    NotPersisted,
}

impl LinkOutcome {
    pub fn persisted(self) -> bool {
        matches!(self, LinkOutcome::Linked)
    }

    pub fn message_key(self) -> &'static str {
        match self {
            LinkOutcome::Linked => "auth.linked",
            LinkOutcome::NotPersisted => "auth.linked_not_saved",
        }
    }
}

/// Issues and checks account-link URLs.
#[derive(Clone)]
pub struct LinkIssuer {
    secret: String,
    ttl: Duration,
    public_url: String,
}

impl LinkIssuer {
    pub fn new(config: &Config) -> Self {
        Self {
            secret: config.jwt.secret.clone(),
            ttl: Duration::minutes(config.jwt.link_state_ttl_minutes),
            public_url: config.server.public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn generate_link_state(&self, owner_id: OwnerId, lang: Option<&str>) -> AppResult<String> {
        let now = Utc::now();
        let claims = LinkState {
            owner_id,
            nonce: uuid::Uuid::new_v4().to_string(),
            lang: lang.map(str::to_string),
            iat: now.timestamp() as usize,
            exp: (now + self.ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn decode_link_state(&self, token: &str) -> AppResult<LinkState> {
        let data = decode::<LinkState>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::warn!("Rejected account-link state: {:?}", e);
            e
        })?;
        Ok(data.claims)
    }

    /// URL the user opens to start linking; it redirects to Google's consent screen.
    pub fn link_url(&self, owner_id: OwnerId, lang: Option<&str>) -> AppResult<String> {
        let state = self.generate_link_state(owner_id, lang)?;
        Ok(format!(
            "{}/auth/google?state={}",
            self.public_url,
            urlencoding::encode(&state)
        ))
    }
}

pub struct AuthService;

impl AuthService {
    /// Burn the nonce of `link`. A state that already reached the callback is
    /// rejected; without a store the callback fails closed.
    pub async fn consume_link_state(db: &Database, link: &LinkState) -> AppResult<()> {
        let pool = db.pool().await.ok_or(AppError::StoreUnavailable)?;
        let expires_at = DateTime::from_timestamp(link.exp as i64, 0)
            .ok_or(AppError::Unauthorized)?
            .naive_utc();

        let fresh = LinkStateRepository::consume(
            &pool,
            &link.nonce,
            link.owner_id,
            Utc::now().naive_utc(),
            expires_at,
        )
        .await?;

        if !fresh {
            tracing::warn!("Replayed account-link state for owner {}", link.owner_id);
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    pub async fn purge_consumed_states(db: &Database) -> AppResult<u64> {
        let Some(pool) = db.pool().await else {
            return Ok(0);
        };
        LinkStateRepository::purge_expired(&pool, Utc::now().naive_utc()).await
    }

    /// Persist the credential, then flip the gate. The gate is only marked after a
    /// durable write, so a failed save never leaves a half-linked user.
    pub async fn complete_link(
        store: &CredentialStore,
        gate: &AuthGate,
        owner_id: OwnerId,
        profile: &CredentialProfile,
    ) -> LinkOutcome {
        if let Err(e) = store.store(owner_id, profile).await {
            tracing::error!("Failed to store credentials for owner {}: {:?}", owner_id, e);
            return LinkOutcome::NotPersisted;
        }

        match gate.mark_authenticated(owner_id).await {
            Ok(()) => LinkOutcome::Linked,
            Err(e) => {
                tracing::error!("Failed to mark owner {} authenticated: {:?}", owner_id, e);
                LinkOutcome::NotPersisted
            }
        }
    }

    /// Finish the Google consent round trip for the owner named in `state_token`.
    pub async fn handle_google_callback(
        state: &Arc<AppState>,
        code: &str,
        state_token: &str,
    ) -> AppResult<(LinkState, LinkOutcome)> {
        let link = state
            .links
            .decode_link_state(state_token)
            .map_err(|_| AppError::Unauthorized)?;
        Self::consume_link_state(&state.db, &link).await?;

        let tokens = state.google.exchange_code(code).await?;
        if tokens.refresh_token.is_none() {
            tracing::warn!(
                "Google did not return a refresh token for owner {}",
                link.owner_id
            );
        }
        let profile = state.google.get_profile(&tokens.access_token).await?;
        tracing::info!(
            "Google account {} authorized by owner {}",
            profile.id,
            link.owner_id
        );

        let credential = profile.into_credential(tokens);
        let outcome =
            Self::complete_link(&state.credentials, &state.gate, link.owner_id, &credential).await;

        Self::notify_owner(state, &link, outcome).await;
        Ok((link, outcome))
    }

    async fn notify_owner(state: &Arc<AppState>, link: &LinkState, outcome: LinkOutcome) {
        let telegram = state.telegram.read().await.clone();
        let Some(telegram) = telegram else {
            return;
        };

        // Private chats share the user's id.
        let text = i18n::tr(link.lang.as_deref(), outcome.message_key(), None);
        if let Err(e) = telegram.send_message(link.owner_id, &text).await {
            tracing::warn!(
                "Failed to notify owner {} about account link: {:?}",
                link.owner_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, Database};

    fn issuer() -> LinkIssuer {
        let mut config = Config::default();
        config.jwt.secret = "test-secret".to_string();
        config.server.public_url = "https://bot.example.com/".to_string();
        LinkIssuer::new(&config)
    }

    fn profile() -> CredentialProfile {
        CredentialProfile {
            external_account_id: "g-9".to_string(),
            display_name: "Sam".to_string(),
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
        }
    }

    #[test]
    fn link_state_round_trip() {
        let issuer = issuer();
        let token = issuer.generate_link_state(77, Some("ru")).expect("encode");
        let state = issuer.decode_link_state(&token).expect("decode");

        assert_eq!(state.owner_id, 77);
        assert_eq!(state.lang.as_deref(), Some("ru"));
        assert!(state.exp > state.iat);
    }

    #[test]
    fn link_state_signed_with_other_secret_is_rejected() {
        let mut config = Config::default();
        config.jwt.secret = "other".to_string();
        let foreign = LinkIssuer::new(&config)
            .generate_link_state(1, None)
            .expect("encode");

        assert!(matches!(
            issuer().decode_link_state(&foreign),
            Err(AppError::Jwt(_))
        ));
    }

    #[test]
    fn link_url_points_at_the_consent_redirect() {
        let url = issuer().link_url(5, None).expect("url");
        assert!(url.starts_with("https://bot.example.com/auth/google?state="));
    }

    #[tokio::test]
    async fn complete_link_stores_then_marks() {
        let store = CredentialStore::new(Database::connected(test_pool().await), 30);
        let gate = AuthGate::new(store.clone());

        let outcome = AuthService::complete_link(&store, &gate, 8, &profile()).await;
        assert_eq!(outcome, LinkOutcome::Linked);
        assert!(gate.is_authenticated(8).await);
    }

    #[tokio::test]
    async fn complete_link_without_store_is_not_persisted() {
        let store = CredentialStore::new(Database::disconnected(), 30);
        let gate = AuthGate::new(store.clone());

        let outcome = AuthService::complete_link(&store, &gate, 8, &profile()).await;
        assert_eq!(outcome, LinkOutcome::NotPersisted);
        assert!(!outcome.persisted());
        assert!(!gate.is_authenticated(8).await);
    }

    #[tokio::test]
    async fn link_state_is_single_use() {
        let issuer = issuer();
        let db = Database::connected(test_pool().await);
        let token = issuer.generate_link_state(12, None).expect("encode");
        let link = issuer.decode_link_state(&token).expect("decode");

        AuthService::consume_link_state(&db, &link)
            .await
            .expect("first use");
        assert!(matches!(
            AuthService::consume_link_state(&db, &link).await,
            Err(AppError::Unauthorized)
        ));

        let other = issuer
            .decode_link_state(&issuer.generate_link_state(12, None).expect("encode"))
            .expect("decode");
        assert!(AuthService::consume_link_state(&db, &other).await.is_ok());
    }

    #[tokio::test]
    async fn consuming_without_store_fails_closed() {
        let issuer = issuer();
        let link = issuer
            .decode_link_state(&issuer.generate_link_state(13, None).expect("encode"))
            .expect("decode");
        assert!(matches!(
            AuthService::consume_link_state(&Database::disconnected(), &link).await,
            Err(AppError::StoreUnavailable)
        ));
    }

    #[tokio::test]
    async fn purge_keeps_unexpired_nonces() {
        let issuer = issuer();
        let db = Database::connected(test_pool().await);
        let link = issuer
            .decode_link_state(&issuer.generate_link_state(14, None).expect("encode"))
            .expect("decode");
        AuthService::consume_link_state(&db, &link)
            .await
            .expect("consume");

        assert_eq!(
            AuthService::purge_consumed_states(&db).await.expect("purge"),
            0
        );
        assert!(AuthService::consume_link_state(&db, &link).await.is_err());
    }
}
