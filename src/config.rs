//! Environment-driven configuration
//!
//! Everything operational comes from environment variables with workable
//! defaults, so a bare `cargo run` against a local Redis serves requests.
//! Only malformed values fail startup; absent ones fall back.

use std::time::Duration;

use crate::ratelimit::RateLimitSettings;

/// Per-tier AI provider settings.
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Chat-completions base URL
    pub base_url: String,
    /// Bearer key for the upstream
    pub api_key: String,
    /// Model name sent in the request body
    pub model: String,
    /// Use the SSE streaming endpoint instead of plain JSON
    pub streaming: bool,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Redis connection URL; absent means in-process counters only
    pub redis_url: Option<String>,
    /// SQLite DSN for credentials and rollups
    pub database_url: String,
    /// Allowed CORS origins; `*` for any
    pub cors_origins: Vec<String>,
    /// Token for privileged statistics operations; empty disables them
    pub admin_token: String,
    /// Default rate-limit window
    pub rate_limit: RateLimitSettings,
    /// Response cache TTL
    pub response_cache_ttl: Duration,
    /// Entry ceiling per in-memory cache
    pub cache_max_entries: usize,
    /// Byte ceiling per in-memory cache
    pub cache_max_bytes: usize,
    /// Latency samples the aggregator keeps
    pub latency_retention: usize,
    /// Scheduled aggregation interval; zero disables the schedule
    pub aggregation_interval: Duration,
    /// AI provider call timeout
    pub ai_timeout: Duration,
    /// Fast tier provider
    pub tier_fast: TierConfig,
    /// Normal tier provider
    pub tier_normal: TierConfig,
    /// Pro tier provider
    pub tier_pro: TierConfig,
    /// Relational pool ceiling
    pub db_max_connections: u32,
    /// Connections opened eagerly at startup
    pub db_min_connections: u32,
}

impl ServiceConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let ai_base_url =
            env_or("AI_BASE_URL", "http://localhost:11434/v1");
        let ai_api_key = env_or("AI_API_KEY", "");
        let streaming = parse_bool(&env_or("AI_STREAMING", "false"));

        let tier = |model_var: &str, default_model: &str| TierConfig {
            base_url: ai_base_url.clone(),
            api_key: ai_api_key.clone(),
            model: env_or(model_var, default_model),
            streaming,
        };

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "8080").parse()?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            database_url: env_or("DATABASE_URL", "sqlite://palisade.db"),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            admin_token: env_or("ADMIN_TOKEN", ""),
            rate_limit: RateLimitSettings {
                limit: env_or("RATE_LIMIT_MAX", "100").parse()?,
                window: Duration::from_secs(env_or("RATE_LIMIT_WINDOW_SECS", "60").parse()?),
            },
            response_cache_ttl: Duration::from_secs(
                env_or("RESPONSE_CACHE_TTL_SECS", "300").parse()?,
            ),
            cache_max_entries: env_or("CACHE_MAX_ENTRIES", "10000").parse()?,
            cache_max_bytes: env_or("CACHE_MAX_BYTES", "67108864").parse()?,
            latency_retention: env_or("LATENCY_RETENTION", "500").parse()?,
            aggregation_interval: Duration::from_secs(
                env_or("AGGREGATION_INTERVAL_SECS", "0").parse()?,
            ),
            ai_timeout: Duration::from_secs(env_or("AI_TIMEOUT_SECS", "5").parse()?),
            tier_fast: tier("AI_MODEL_FAST", "llama3.2:1b"),
            tier_normal: tier("AI_MODEL_NORMAL", "llama3.2:3b"),
            tier_pro: tier("AI_MODEL_PRO", "llama3.1:8b"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", "10").parse()?,
            db_min_connections: env_or("DB_MIN_CONNECTIONS", "2").parse()?,
        })
    }

    /// Bind address string.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.rate_limit.limit, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.latency_retention, 500);
        assert_eq!(config.ai_timeout, Duration::from_secs(5));
        assert!(!config.server_address().is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool(" YES "));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
