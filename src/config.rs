use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub google: GoogleConfig,
    pub llm: LlmConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used for the Telegram webhook and account-link URLs.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound for opening the pool and for acquiring a connection from it.
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    /// Value Telegram echoes back in `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub calendar_id: String,
    /// IANA zone name sent with every inserted event.
    pub time_zone: String,
    pub event_duration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    /// Lifetime of the signed state embedded in account-link URLs.
    pub link_state_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for auth endpoints (e.g. /auth/google)
    pub auth_per_second: u32,
    /// Burst size for auth endpoints
    pub auth_burst: u32,
    /// Allowed requests per second (per IP) for webhook endpoints (e.g. /webhooks/telegram)
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// How long a stored credential bundle stays valid after its last write.
    pub credential_ttl_days: i64,
    /// How long a partially-filled event survives between messages.
    pub slot_draft_ttl_minutes: i64,
    /// How often (seconds) the purge worker removes expired rows.
    pub purge_interval_seconds: u64,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

/// First non-empty value among `names`. Reported missing under the first name.
fn required(names: &[&str]) -> Result<String, ConfigError> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(names.first().copied().unwrap_or_default().to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let public_url =
            env::var("PUBLIC_URL").unwrap_or_else(|_| defaults.server.public_url.clone());

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_or("PORT", 3000)?,
                public_url: public_url.clone(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database.url.clone()),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
                connect_timeout_seconds: parse_or("DATABASE_CONNECT_TIMEOUT_SECONDS", 5)?,
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN")
                    .or_else(|_| env::var("BOT_TOKEN"))
                    .ok(),
                webhook_secret: required(&["TELEGRAM_WEBHOOK_SECRET", "WEBHOOK_SECRET"])?,
            },
            google: GoogleConfig {
                client_id: required(&["GOOGLE_CLIENT_ID"])?,
                client_secret: required(&["GOOGLE_CLIENT_SECRET"])?,
                redirect_uri: env::var("GOOGLE_CALLBACK_URL").unwrap_or_else(|_| {
                    format!("{}/auth/google/callback", public_url.trim_end_matches('/'))
                }),
                calendar_id: env::var("GOOGLE_CALENDAR_ID")
                    .unwrap_or_else(|_| defaults.google.calendar_id.clone()),
                time_zone: env::var("CALENDAR_TIME_ZONE")
                    .unwrap_or_else(|_| defaults.google.time_zone.clone()),
                event_duration_minutes: parse_or("CALENDAR_EVENT_DURATION_MINUTES", 60)?,
            },
            llm: LlmConfig {
                api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| defaults.llm.model.clone()),
                base_url: env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| defaults.llm.base_url.clone()),
                timeout_seconds: parse_or("LLM_TIMEOUT_SECONDS", 30)?,
            },
            jwt: JwtConfig {
                secret: required(&["JWT_SECRET"])?,
                link_state_ttl_minutes: parse_or("LINK_STATE_TTL_MINUTES", 10)?,
            },
            rate_limit: RateLimitConfig {
                auth_per_second: parse_or("RATE_LIMIT_AUTH_PER_SECOND", 3)?,
                auth_burst: parse_or("RATE_LIMIT_AUTH_BURST", 10)?,
                webhook_per_second: parse_or("RATE_LIMIT_WEBHOOKS_PER_SECOND", 10)?,
                webhook_burst: parse_or("RATE_LIMIT_WEBHOOKS_BURST", 50)?,
            },
            retention: RetentionConfig {
                credential_ttl_days: parse_or("CREDENTIAL_TTL_DAYS", 30)?,
                slot_draft_ttl_minutes: parse_or("SLOT_DRAFT_TTL_MINUTES", 15)?,
                purge_interval_seconds: parse_or("PURGE_INTERVAL_SECONDS", 3600)?,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                public_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/ontime.db".to_string(),
                max_connections: 5,
                connect_timeout_seconds: 5,
            },
            telegram: TelegramConfig {
                bot_token: None,
                webhook_secret: String::new(),
            },
            google: GoogleConfig {
                client_id: String::new(),
                client_secret: String::new(),
                redirect_uri: "http://localhost:3000/auth/google/callback".to_string(),
                calendar_id: "primary".to_string(),
                time_zone: "UTC".to_string(),
                event_duration_minutes: 60,
            },
            llm: LlmConfig {
                api_key: None,
                model: "gemini-2.5-flash".to_string(),
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                timeout_seconds: 30,
            },
            jwt: JwtConfig {
                secret: String::new(),
                link_state_ttl_minutes: 10,
            },
            rate_limit: RateLimitConfig {
                auth_per_second: 3,
                auth_burst: 10,
                webhook_per_second: 10,
                webhook_burst: 50,
            },
            retention: RetentionConfig {
                credential_ttl_days: 30,
                slot_draft_ttl_minutes: 15,
                purge_interval_seconds: 3600,
            },
        }
    }
}
