pub mod auth;
pub mod health;
pub mod webhooks;

/// State over an in-memory store with the webhook secret set to `hook-secret`.
#[cfg(test)]
pub async fn test_state() -> std::sync::Arc<crate::AppState> {
    let mut config = crate::config::Config::default();
    config.telegram.webhook_secret = "hook-secret".to_string();
    config.jwt.secret = "jwt-secret".to_string();
    config.google.client_id = "client-id".to_string();

    let db = crate::db::Database::connected(crate::db::test_pool().await);
    std::sync::Arc::new(crate::AppState::build(config, db).expect("state"))
}
