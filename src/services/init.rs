//! Startup and background plumbing:
//! - database connection + migrations
//! - Telegram bot + webhook registration
//! - the purge/reconnect worker

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;

use crate::config::Config;
use crate::services::auth::AuthService;
use crate::services::telegram::TelegramService;
use crate::AppState;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool and run migrations, bounded by the configured connect timeout.
///
/// Creates the parent directory for the database file if needed.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    let timeout = Duration::from_secs(config.database.connect_timeout_seconds);
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(timeout);

    let pool = tokio::time::timeout(
        timeout,
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(timeout)
            .connect_with(connect_options),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Timed out connecting to database after {:?}", timeout))??;

    tracing::info!("Connected to database file: {}", db_file_path.display());

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Start the Telegram bot and register the webhook. Failures are logged; the HTTP
/// server still starts so account linking keeps working.
pub async fn initialize_telegram(state: &Arc<AppState>) {
    let Some(ref token) = state.config.telegram.bot_token else {
        tracing::warn!("TELEGRAM_BOT_TOKEN not set; replies will not be delivered");
        return;
    };

    tracing::info!("Initializing Telegram bot");
    let telegram = match TelegramService::new(token.clone()).await {
        Ok(telegram) => telegram,
        Err(e) => {
            tracing::warn!("Failed to initialize Telegram bot: {}", e);
            return;
        }
    };

    let webhook_url = format!(
        "{}/webhooks/telegram",
        state.config.server.public_url.trim_end_matches('/')
    );
    if let Err(e) = telegram
        .set_webhook(&webhook_url, &state.config.telegram.webhook_secret)
        .await
    {
        tracing::warn!("Failed to register Telegram webhook: {}", e);
    }

    *state.telegram.write().await = Some(telegram);
    tracing::info!("Telegram bot initialized successfully");
}

/// One purge pass over both tables. Reconnects first if startup left the store detached.
pub async fn run_maintenance(state: &Arc<AppState>) {
    if !state.db.is_connected().await {
        tracing::info!("Database not connected, retrying");
        match init_db(&state.config).await {
            Ok(pool) => {
                state.db.attach(pool).await;
                tracing::info!("Database connection restored");
            }
            Err(e) => {
                tracing::warn!("Database still unavailable: {:?}", e);
                return;
            }
        }
    }

    match state.credentials.purge_expired().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Purged {} expired credential bundles", n),
        Err(e) => tracing::warn!("Failed to purge expired credentials: {:?}", e),
    }

    match state.drafts.purge_expired().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Purged {} expired slot drafts", n),
        Err(e) => tracing::warn!("Failed to purge expired slot drafts: {:?}", e),
    }

    match AuthService::purge_consumed_states(&state.db).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Purged {} consumed link states", n),
        Err(e) => tracing::warn!("Failed to purge consumed link states: {:?}", e),
    }
}

/// Spawn the maintenance worker. It listens for a shutdown notification via the
/// broadcast sender; the returned handles let callers await its exit.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let mut shutdown_rx = shutdown.subscribe();
        let interval = Duration::from_secs(state.config.retention.purge_interval_seconds.max(1));
        handles.push(tokio::spawn(async move {
            loop {
                tracing::debug!("Running credential and draft maintenance");
                run_maintenance(&state).await;

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Maintenance worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    }

    handles
}
