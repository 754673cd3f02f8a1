use std::sync::Arc;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::services::telegram::Update;
use crate::AppState;

pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub struct WebhookService;

impl WebhookService {
    fn get_header<'a>(headers: &'a HeaderMap, name: &str) -> AppResult<&'a str> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!("Webhook request without {} header", name);
                AppError::Unauthorized
            })
    }

    /// Check the secret Telegram echoes on every delivery. Digests are compared so the
    /// comparison does not depend on where the first differing byte is. An unset secret
    /// rejects everything.
    pub fn verify_secret(headers: &HeaderMap, expected: &str) -> AppResult<()> {
        if expected.is_empty() {
            tracing::error!("Webhook secret not configured; rejecting delivery");
            return Err(AppError::Unauthorized);
        }

        let provided = Self::get_header(headers, TELEGRAM_SECRET_HEADER)?;
        if Sha256::digest(provided.as_bytes()) != Sha256::digest(expected.as_bytes()) {
            tracing::warn!("Webhook secret mismatch");
            return Err(AppError::Unauthorized);
        }

        Ok(())
    }

    /// Run one update through the assistant and send the reply. Runs after the
    /// webhook has been acknowledged, so failures are only logged.
    pub async fn process_update(state: Arc<AppState>, update: Update) {
        let update_id = update.update_id;
        let Some(inbound) = update.into_inbound() else {
            tracing::debug!("Ignoring update {} without a text message", update_id);
            return;
        };

        tracing::info!(
            "Processing update {} from chat {}",
            update_id,
            inbound.chat_id
        );

        let reply = state
            .assistant
            .handle(
                inbound.owner_id,
                &inbound.text,
                inbound.language_code.as_deref(),
            )
            .await;

        let telegram = state.telegram.read().await.clone();
        match telegram {
            Some(telegram) => {
                if let Err(e) = telegram.send_message(inbound.chat_id, &reply).await {
                    tracing::warn!("Failed to reply to chat {}: {:?}", inbound.chat_id, e);
                }
            }
            None => tracing::warn!(
                "Telegram not configured; dropping reply to chat {}",
                inbound.chat_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            TELEGRAM_SECRET_HEADER,
            HeaderValue::from_str(secret).expect("header"),
        );
        headers
    }

    #[test]
    fn matching_secret_is_accepted() {
        assert!(WebhookService::verify_secret(&headers("s3cret"), "s3cret").is_ok());
    }

    #[test]
    fn wrong_or_missing_secret_is_rejected() {
        assert!(matches!(
            WebhookService::verify_secret(&headers("nope"), "s3cret"),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            WebhookService::verify_secret(&HeaderMap::new(), "s3cret"),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn empty_configured_secret_rejects_everything() {
        assert!(matches!(
            WebhookService::verify_secret(&headers(""), ""),
            Err(AppError::Unauthorized)
        ));
    }
}
