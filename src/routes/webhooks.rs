use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::services::telegram::Update;
use crate::services::webhooks::WebhookService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/telegram", post(handle_telegram_webhook))
}

/// Acknowledge right away; extraction, LLM and calendar work run in a spawned task so
/// a slow model never makes Telegram redeliver the update.
async fn handle_telegram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    WebhookService::verify_secret(&headers, &state.config.telegram.webhook_secret)?;

    let update: Update = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid update: {}", e)))?;

    tracing::debug!("Received Telegram update {}", update.update_id);
    tokio::spawn(WebhookService::process_update(state.clone(), update));

    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::routes::test_state;
    use crate::services::webhooks::TELEGRAM_SECRET_HEADER;

    const UPDATE: &str = r#"{"update_id":1,"message":{"message_id":1,"chat":{"id":5},"from":{"id":5},"text":"/start"}}"#;

    async fn post(secret: Option<&str>, body: &'static str) -> StatusCode {
        let app = Router::new()
            .nest("/webhooks", router())
            .with_state(test_state().await);

        let mut request = Request::builder()
            .method("POST")
            .uri("/webhooks/telegram")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            request = request.header(TELEGRAM_SECRET_HEADER, secret);
        }

        app.oneshot(request.body(Body::from(body)).expect("request"))
            .await
            .expect("response")
            .status()
    }

    #[tokio::test]
    async fn valid_secret_is_acknowledged() {
        assert_eq!(post(Some("hook-secret"), UPDATE).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_is_unauthorized() {
        assert_eq!(post(Some("wrong"), UPDATE).await, StatusCode::UNAUTHORIZED);
        assert_eq!(post(None, UPDATE).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn undecodable_update_is_bad_request() {
        assert_eq!(
            post(Some("hook-secret"), "not json").await,
            StatusCode::BAD_REQUEST
        );
    }
}
