use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axum::body::Body;
use http::StatusCode;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};

mod config;
mod db;
mod error;
mod i18n;
mod routes;
mod services;

use config::Config;
use db::Database;
use error::AppResult;
use services::{
    assistant::EventAssistant,
    auth::LinkIssuer,
    auth_gate::AuthGate,
    calendar::CalendarWriter,
    credentials::CredentialStore,
    google::{GoogleCalendarWriter, GoogleOAuthService},
    init,
    llm::{GeminiClient, LlmClient},
    slots::DraftStore,
    telegram::TelegramService,
};

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub credentials: CredentialStore,
    pub gate: AuthGate,
    pub drafts: DraftStore,
    pub links: LinkIssuer,
    pub google: GoogleOAuthService,
    pub assistant: EventAssistant,
    pub telegram: Arc<RwLock<Option<TelegramService>>>,
}

impl AppState {
    /// Wire the stores and collaborators over a (possibly still disconnected) database.
    pub fn build(config: Config, db: Database) -> AppResult<Self> {
        let credentials = CredentialStore::new(db.clone(), config.retention.credential_ttl_days);
        let gate = AuthGate::new(credentials.clone());
        let drafts = DraftStore::new(db.clone(), config.retention.slot_draft_ttl_minutes);
        let links = LinkIssuer::new(&config);
        let google = GoogleOAuthService::new(&config.google)?;

        let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(&config.llm)?);
        let calendar: Arc<dyn CalendarWriter> = Arc::new(GoogleCalendarWriter::new(
            google.clone(),
            credentials.clone(),
        ));

        let assistant = EventAssistant::new(
            gate.clone(),
            credentials.clone(),
            drafts.clone(),
            links.clone(),
            llm,
            calendar,
            Some(google.clone()),
            Duration::from_secs(config.llm.timeout_seconds),
        );

        Ok(Self {
            config,
            db,
            credentials,
            gate,
            drafts,
            links,
            google,
            assistant,
            telegram: Arc::new(RwLock::new(None)),
        })
    }
}

/// Shared error handler for every rate limiter. Same JSON shape as `AppError`.
fn rate_limited_response(error: GovernorError) -> http::Response<Body> {
    let json_response = |status: StatusCode, body: serde_json::Value| {
        let mut resp = http::Response::new(Body::from(body.to_string()));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        resp
    };

    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            // `wait_time` is provided as seconds
            let mut resp = json_response(
                StatusCode::TOO_MANY_REQUESTS,
                serde_json::json!({
                    "error": {
                        "code": "RATE_LIMITED",
                        "message": "Rate limit exceeded",
                        "details": { "retry_after_seconds": wait_time }
                    }
                }),
            );

            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, http::HeaderValue::from(wait_time));
            resp
        }
        GovernorError::UnableToExtractKey => json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "Unable to determine client IP for rate limiting"
                }
            }),
        ),
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ontime_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting OnTime bot");

    // The bot keeps serving with the store detached; every credential operation
    // fails closed until the maintenance worker reconnects.
    let db = match init::init_db(&config).await {
        Ok(pool) => Database::connected(pool),
        Err(e) => {
            tracing::error!("Database unavailable at startup: {:?}", e);
            Database::disconnected()
        }
    };

    let app_state = Arc::new(AppState::build(config.clone(), db)?);

    init::initialize_telegram(&app_state).await;

    // Create shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Rate limiters for the public endpoints (account linking, webhooks)
    let mut auth_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    auth_builder.per_second(config.rate_limit.auth_per_second.into());
    auth_builder.burst_size(config.rate_limit.auth_burst);
    auth_builder.error_handler(rate_limited_response);
    let auth_gov_conf = Arc::new(
        auth_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build auth governor config"))?,
    );

    let mut webhooks_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    webhooks_builder.per_second(config.rate_limit.webhook_per_second.into());
    webhooks_builder.burst_size(config.rate_limit.webhook_burst);
    webhooks_builder.error_handler(rate_limited_response);
    let webhooks_gov_conf = Arc::new(
        webhooks_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build webhooks governor config"))?,
    );

    // Background cleanup for limiter storage. Each sweep drops stale keys and
    // reports the remaining size.
    let spawn_cleaner = |name: &'static str, sweep: Box<dyn Fn() -> usize + Send>| {
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            // Use smaller sleep granularity to allow quick shutdown.
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("{} rate limiter cleanup thread exiting", name);
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("{} rate limiter size: {}", name, sweep());
            }
        })
    };
    let auth_limiter = auth_gov_conf.limiter().clone();
    let auth_cleaner = spawn_cleaner(
        "auth",
        Box::new(move || {
            auth_limiter.retain_recent();
            auth_limiter.len()
        }),
    );
    let webhooks_limiter = webhooks_gov_conf.limiter().clone();
    let webhooks_cleaner = spawn_cleaner(
        "webhooks",
        Box::new(move || {
            webhooks_limiter.retain_recent();
            webhooks_limiter.len()
        }),
    );

    let auth_rate_layer = GovernorLayer {
        config: auth_gov_conf.clone(),
    };
    let webhooks_rate_layer = GovernorLayer {
        config: webhooks_gov_conf.clone(),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        // Google account linking (rate limited)
        .nest("/auth", routes::auth::router().layer(auth_rate_layer))
        // Telegram webhook deliveries (rate limited)
        .nest(
            "/webhooks",
            routes::webhooks::router().layer(webhooks_rate_layer),
        )
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    // Select between the server future and the signal future. On a shutdown signal we
    // notify background workers and threads, then drop the server future.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                tracing::warn!("Failed to bind Ctrl+C: {}", e);
            }
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server future dropped to stop accepting new connections");
        }
    }

    // Give background workers some time to finish their work.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    let _ = tokio::time::timeout(shutdown_wait, bg_wait).await;

    // Join std threads; they check `thread_shutdown` and should exit quickly.
    if let Err(e) = auth_cleaner.join() {
        tracing::warn!("Auth cleanup thread join failed: {:?}", e);
    }
    if let Err(e) = webhooks_cleaner.join() {
        tracing::warn!("Webhooks cleanup thread join failed: {:?}", e);
    }

    if let Some(pool) = app_state.db.detach().await {
        pool.close().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
