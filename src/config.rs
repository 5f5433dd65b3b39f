//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::audit_store::AuditRetryPolicy;
use crate::worker::WorkerConfig;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Balance store connection URL
    pub database_url: String,

    /// Audit store connection URL (defaults to DATABASE_URL)
    pub audit_database_url: String,

    /// Event channel connection URL (defaults to DATABASE_URL)
    pub queue_database_url: String,

    /// Maximum database connections in each pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Event channel queue name
    pub queue_name: String,

    /// Longest wait for a row lock
    pub lock_timeout: Duration,

    /// Longest single store statement, and the pool acquire timeout
    pub store_timeout: Duration,

    pub audit_max_attempts: u32,
    pub audit_backoff: Duration,
    pub requeue_delay: Duration,
    /// Deliveries before a non-transient failure is dead-lettered
    pub max_deliveries: u32,
    pub queue_poll_interval: Duration,
    pub queue_lease: Duration,
    pub lease_reclaim_interval: Duration,

    pub log_format: LogFormat,
}

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    var_or(name, default)
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

fn millis_or(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(name, &default.to_string()).map(Duration::from_millis)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;
        let audit_database_url = var_or("AUDIT_DATABASE_URL", &database_url);
        let queue_database_url = var_or("QUEUE_DATABASE_URL", &database_url);

        let audit_max_attempts: u32 = parse_or("AUDIT_MAX_ATTEMPTS", "3")?;
        if audit_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("AUDIT_MAX_ATTEMPTS"));
        }

        let max_deliveries: u32 = parse_or("WORKER_MAX_DELIVERIES", "5")?;
        if max_deliveries == 0 {
            return Err(ConfigError::InvalidValue("WORKER_MAX_DELIVERIES"));
        }

        let log_format = match var_or("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        Ok(Self {
            database_url,
            audit_database_url,
            queue_database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", "10")?,
            host: var_or("HOST", "127.0.0.1"),
            port: parse_or("PORT", "3000")?,
            environment: var_or("ENVIRONMENT", "development"),
            queue_name: var_or("QUEUE_NAME", "transactions"),
            lock_timeout: millis_or("LOCK_TIMEOUT_MS", 5_000)?,
            store_timeout: millis_or("STORE_TIMEOUT_MS", 10_000)?,
            audit_max_attempts,
            audit_backoff: millis_or("AUDIT_BACKOFF_MS", 2_000)?,
            requeue_delay: millis_or("REQUEUE_DELAY_MS", 1_000)?,
            max_deliveries,
            queue_poll_interval: millis_or("QUEUE_POLL_INTERVAL_MS", 500)?,
            queue_lease: Duration::from_secs(parse_or("QUEUE_LEASE_SECS", "60")?),
            lease_reclaim_interval: Duration::from_secs(parse_or(
                "LEASE_RECLAIM_INTERVAL_SECS",
                "30",
            )?),
            log_format,
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            audit_retry: AuditRetryPolicy {
                max_attempts: self.audit_max_attempts,
                backoff: self.audit_backoff,
                attempt_timeout: self.store_timeout,
            },
            requeue_delay: self.requeue_delay,
            max_deliveries: self.max_deliveries,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
