//! Configuration for the update server

use std::env;

/// Server configuration, loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub host: String,
    pub port: u16,

    /// Static admin API key for management endpoints. Empty disables the
    /// key check (JWT admin role still works).
    pub admin_api_key: String,

    /// Redis URL backing the registries
    pub redis_url: String,

    /// Artifact store backend; only `local` is implemented
    pub storage_type: String,

    /// Base directory of the artifact blob store
    pub storage_path: String,

    pub jwt_secret: String,
    pub jwt_issuer: String,

    /// An online instance with no heartbeat for this long is swept offline
    pub offline_after_secs: u64,

    /// How often the offline sweep runs
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables, with defaults suitable
    /// for local development.
    pub fn from_env() -> Self {
        Config {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: env_parse("SERVER_PORT", 8080),
            admin_api_key: env_or("ADMIN_API_KEY", ""),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            storage_type: env_or("STORAGE_TYPE", "local"),
            storage_path: env_or("STORAGE_LOCAL_PATH", "./artifacts"),
            jwt_secret: env_or("JWT_SECRET", "change-this-secret-in-production"),
            jwt_issuer: env_or("JWT_ISSUER", "updates.mysoc.ai"),
            offline_after_secs: env_parse("OFFLINE_AFTER_SECS", 300),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
