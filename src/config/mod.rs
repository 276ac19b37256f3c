/// Configuration management for the docflow server
///
/// Handles server binding, database location, background job tuning and the
/// payment gateway credentials. Every value can be overridden from the environment.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Background job queue configuration
    pub jobs: JobConfig,
    /// Payment gateway configuration
    pub gateway: GatewayConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Shared secret for operator-only routes (plan management); unset disables them
    pub operator_token: Option<String>,
}

/// SQLite database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g., "sqlite://data/docflow.db")
    pub url: String,
}

/// Durable job queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Cron expression (with seconds) driving the worker poll
    pub schedule: String,
    /// Maximum jobs claimed per poll
    pub batch_size: i64,
    /// Attempts before a job is marked failed for good
    pub max_attempts: i64,
    /// Base retry delay; doubled on each further attempt
    pub backoff_secs: i64,
    /// Running jobs older than this are handed out again
    pub lease_secs: i64,
}

/// Payment gateway credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the gateway REST API
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("DOCFLOW_HOST", "0.0.0.0"),
                port: env_parse("DOCFLOW_PORT", 3004),
                operator_token: std::env::var("DOCFLOW_OPERATOR_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            database: DatabaseConfig {
                url: env_or("DOCFLOW_DATABASE_URL", "sqlite://data/docflow.db"),
            },
            jobs: JobConfig::default(),
            gateway: GatewayConfig {
                base_url: env_or("DOCFLOW_GATEWAY_URL", "https://api.razorpay.com/v1"),
                key_id: env_or("DOCFLOW_GATEWAY_KEY", ""),
                key_secret: env_or("DOCFLOW_GATEWAY_SECRET", ""),
            },
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            schedule: env_or("DOCFLOW_JOB_SCHEDULE", "*/5 * * * * *"),
            batch_size: env_parse("DOCFLOW_JOB_BATCH", 10),
            max_attempts: env_parse("DOCFLOW_JOB_MAX_ATTEMPTS", 5),
            backoff_secs: env_parse("DOCFLOW_JOB_BACKOFF_SECS", 30),
            lease_secs: env_parse("DOCFLOW_JOB_LEASE_SECS", 300),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, falling back to the default when unset or malformed
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
