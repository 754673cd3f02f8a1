use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::i18n;
use crate::services::auth::AuthService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/google", get(google_login))
        .route("/google/callback", get(google_callback))
        .route("/failure", get(failure))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginQuery {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub message: String,
    pub linked: bool,
    pub persisted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Entry point of a link URL sent by the bot. Only a valid signed state is forwarded
/// to Google, so stale or forged links fail here instead of after consent.
async fn google_login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, AppError> {
    let token = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing state".to_string()))?;

    let link = state
        .links
        .decode_link_state(&token)
        .map_err(|_| AppError::Unauthorized)?;
    tracing::info!("Starting Google consent for owner {}", link.owner_id);

    let auth_url = state.google.get_auth_url(&token)?;
    Ok(Redirect::temporary(&auth_url))
}

async fn google_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        tracing::warn!("Google consent denied: {}", error);
        return Redirect::to("/auth/failure").into_response();
    }

    let (Some(code), Some(state_token)) = (query.code, query.state) else {
        tracing::warn!("Google callback without code or state");
        return Redirect::to("/auth/failure").into_response();
    };

    match AuthService::handle_google_callback(&state, &code, &state_token).await {
        Ok((link, outcome)) => {
            let body = LinkResponse {
                message: i18n::tr(link.lang.as_deref(), outcome.message_key(), None),
                linked: true,
                persisted: outcome.persisted(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            tracing::error!("Google callback failed: {:?}", e);
            Redirect::to("/auth/failure").into_response()
        }
    }
}

async fn failure() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(LinkResponse {
            message: i18n::t("auth.failed"),
            linked: false,
            persisted: false,
        }),
    )
}
