//! Environment-driven settings
//!
//! All configuration comes from environment variables (with `.env` support
//! at the binary edge). Required values fail startup so the gateway never
//! runs misconfigured; everything else has a production-safe default.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Application settings, loaded once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    /// Accepted client credentials for the `X-API-Key` header
    pub api_keys: Vec<String>,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,

    /// Vector-search backend base URL
    pub search_backend_url: String,
    pub search_api_key: Option<String>,
    pub embed_model: String,

    /// LLM backend base URL (OpenAI-compatible)
    pub llm_backend_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,

    /// Max requests per IP per day
    pub ip_daily_limit: i64,
    /// Max total requests per day, across all IPs
    pub global_daily_limit: i64,
    /// Max requests per IP per minute
    pub rate_limit_per_minute: i64,

    /// Response cache freshness window
    pub cache_ttl: Duration,

    pub debug: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Settings {
    /// Load settings from the environment, failing on missing required
    /// values.
    pub fn from_env() -> Result<Self> {
        let api_keys = env_list("API_KEYS", "");
        if api_keys.is_empty() {
            bail!("API_KEYS must be set (comma-separated client keys)");
        }

        let search_backend_url =
            env::var("SEARCH_BACKEND_URL").context("SEARCH_BACKEND_URL must be set")?;
        let llm_backend_url =
            env::var("LLM_BACKEND_URL").context("LLM_BACKEND_URL must be set")?;

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000)?,
            api_keys,
            allowed_origins: env_list("ALLOWED_ORIGINS", "http://localhost:3000"),
            search_backend_url,
            search_api_key: env::var("SEARCH_API_KEY").ok(),
            embed_model: env_or("EMBED_MODEL", "multilingual-e5-large"),
            llm_backend_url,
            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            ip_daily_limit: env_parse("IP_DAILY_LIMIT", 200)?,
            global_daily_limit: env_parse("GLOBAL_DAILY_LIMIT", 2000)?,
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MIN", 20)?,
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", 300u64)?),
            debug: env_parse("DEBUG", false)?,
        })
    }
}
