use anyhow::{Context, Result};

/// Service configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the careers platform REST API, e.g. `https://careers.example.com/api`.
    pub upstream_api_url: String,
    pub upstream_timeout_secs: u64,
    pub upstream_max_retries: u32,
    pub upstream_retry_base_ms: u64,
    pub max_views: usize,
    /// Views untouched for this long are reclaimed.
    pub view_idle_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            upstream_api_url: require_env("UPSTREAM_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            upstream_timeout_secs: parse_env("UPSTREAM_TIMEOUT_SECS", 30)?,
            upstream_max_retries: parse_env("UPSTREAM_MAX_RETRIES", 3)?,
            upstream_retry_base_ms: parse_env("UPSTREAM_RETRY_BASE_MS", 500)?,
            max_views: parse_env("MAX_VIEWS", 1024)?,
            view_idle_secs: parse_env("VIEW_IDLE_SECS", 1800)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
