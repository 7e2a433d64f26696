//! Application configuration loaded from environment variables.

use std::time::Duration;

use outbox::{CleanupConfig, PublisherConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string; in-memory stores when unset
/// - `OUTBOX_POLL_SECS` — publisher poll interval (default: `5`)
/// - `OUTBOX_BATCH_SIZE` — rows claimed per poll (default: `50`)
/// - `OUTBOX_MAX_RETRIES` — automatic retry cap (default: `5`)
/// - `OUTBOX_RETENTION_DAYS` — processed-row retention (default: `7`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub outbox_poll_secs: u64,
    pub outbox_batch_size: usize,
    pub outbox_max_retries: i32,
    pub outbox_retention_days: u64,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            outbox_poll_secs: env_parsed("OUTBOX_POLL_SECS", 5),
            outbox_batch_size: env_parsed("OUTBOX_BATCH_SIZE", 50),
            outbox_max_retries: env_parsed("OUTBOX_MAX_RETRIES", 5),
            outbox_retention_days: env_parsed("OUTBOX_RETENTION_DAYS", 7),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Publisher settings derived from the outbox variables.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            poll_interval: Duration::from_secs(self.outbox_poll_secs),
            batch_size: self.outbox_batch_size,
            max_retries: self.outbox_max_retries,
        }
    }

    /// Retention sweep settings derived from the outbox variables.
    pub fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            retention: Duration::from_secs(self.outbox_retention_days * 24 * 60 * 60),
            ..CleanupConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            outbox_poll_secs: 5,
            outbox_batch_size: 50,
            outbox_max_retries: 5,
            outbox_retention_days: 7,
        }
    }
}
