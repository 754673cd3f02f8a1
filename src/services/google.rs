use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::GoogleConfig;
use crate::db::{CredentialProfile, OAuthCredential};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{build_event_request, CalendarWriter, ScheduledEvent};
use crate::services::credentials::CredentialStore;
use crate::services::extraction::ExtractedEvent;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

const SCOPES: [&str; 3] = [
    "profile",
    "email",
    "https://www.googleapis.com/auth/calendar",
];

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl GoogleProfile {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn into_credential(self, tokens: GoogleTokenResponse) -> CredentialProfile {
        CredentialProfile {
            display_name: self.display_name(),
            external_account_id: self.id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}

/// Google OAuth2 web-server flow plus the calendar calls made with its tokens.
#[derive(Clone)]
pub struct GoogleOAuthService {
    client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleOAuthService {
    pub fn new(config: &GoogleConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Consent screen URL. `offline` + `consent` make Google issue a refresh token.
    pub fn get_auth_url(&self, state: &str) -> AppResult<String> {
        let scope = SCOPES.join(" ");
        let url = Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build auth URL: {}", e)))?;

        Ok(url.to_string())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> AppResult<GoogleTokenResponse> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to read token response: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::GoogleApi(format!(
                "Google token endpoint error ({}): {}",
                status, body
            )));
        }

        serde_json::from_str::<GoogleTokenResponse>(&body)
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse token response: {}", e)))
    }

    pub async fn exchange_code(&self, code: &str) -> AppResult<GoogleTokenResponse> {
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    pub async fn refresh_access_token(&self, refresh_token: &str) -> AppResult<GoogleTokenResponse> {
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    pub async fn get_profile(&self, access_token: &str) -> AppResult<GoogleProfile> {
        let response = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to fetch Google profile: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Google userinfo error ({}): {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse Google profile: {}", e)))
    }

    /// Best-effort revocation at Google; the local credential is removed regardless.
    pub async fn revoke_token(&self, token: &str) -> AppResult<()> {
        let response = self
            .client
            .post(REVOKE_URL)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to revoke token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Google revoke error ({}): {}",
                status, body
            )));
        }

        Ok(())
    }
}

enum InsertAttempt {
    Created(ScheduledEvent),
    Unauthorized,
}

/// Calendar v3 writer. A rejected access token is refreshed once, rotated through
/// the credential store, and the insert retried.
#[derive(Clone)]
pub struct GoogleCalendarWriter {
    oauth: GoogleOAuthService,
    store: CredentialStore,
}

impl GoogleCalendarWriter {
    pub fn new(oauth: GoogleOAuthService, store: CredentialStore) -> Self {
        Self { oauth, store }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            CALENDAR_API,
            urlencoding::encode(&self.oauth.config.calendar_id)
        )
    }

    async fn try_insert(
        &self,
        event: &ExtractedEvent,
        access_token: &str,
    ) -> AppResult<InsertAttempt> {
        let body = build_event_request(event, &self.oauth.config);

        let response = self
            .oauth
            .client
            .post(self.events_url())
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to insert event: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(InsertAttempt::Unauthorized);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Google Calendar error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map(InsertAttempt::Created)
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse event response: {}", e)))
    }
}

#[async_trait]
impl CalendarWriter for GoogleCalendarWriter {
    async fn insert_event(
        &self,
        event: &ExtractedEvent,
        credential: &OAuthCredential,
    ) -> AppResult<ScheduledEvent> {
        if let InsertAttempt::Created(created) =
            self.try_insert(event, &credential.access_token).await?
        {
            return Ok(created);
        }

        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            tracing::warn!(
                "Access token rejected for owner {} and no refresh token stored",
                credential.owner_id
            );
            return Err(AppError::Unauthorized);
        };

        tracing::info!(
            "Access token rejected for owner {}, refreshing",
            credential.owner_id
        );
        let tokens = self.oauth.refresh_access_token(refresh_token).await?;
        let rotated = self
            .store
            .rotate_tokens(
                credential.owner_id,
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
            )
            .await?;

        match self.try_insert(event, &rotated.access_token).await? {
            InsertAttempt::Created(created) => Ok(created),
            InsertAttempt::Unauthorized => Err(AppError::Unauthorized),
        }
    }
}
