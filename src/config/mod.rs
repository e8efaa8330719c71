//! Configuration management for the lead marketplace
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use crate::lead::{IgnoreOverride, LifecycleRules};
use crate::sweeper::SweeperSettings;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Which lead store implementation to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid STORE_BACKEND: '{}'. Expected: postgres or memory",
                s
            ))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    pub store_backend: StoreBackend,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// CORS allowed origins, comma separated
    pub cors_allowed_origins: Option<String>,

    /// How long a lead stays exposed after submission
    pub auction_window_hours: i64,

    pub sweep_interval_minutes: u64,

    /// Distinct purchasers allowed per lead (unbounded when unset)
    pub max_purchasers_per_lead: Option<usize>,

    pub graceful_stop_timeout_seconds: u64,

    pub sweep_batch_size: usize,

    pub sweep_commit_max_retries: u32,

    pub sweep_retry_base_ms: u64,

    /// Number of recent runs kept for performance metrics
    pub metrics_window: usize,

    pub ignore_override: IgnoreOverride,

    /// Bank-user population for the memory backend
    pub bank_users: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            store_backend: StoreBackend::Postgres,
            environment: Environment::Development,
            port: 3001,
            db_max_connections: 5,
            log_level: "info".to_string(),
            cors_allowed_origins: None,
            auction_window_hours: 48,
            sweep_interval_minutes: 60,
            max_purchasers_per_lead: None,
            graceful_stop_timeout_seconds: 30,
            sweep_batch_size: 500,
            sweep_commit_max_retries: 3,
            sweep_retry_base_ms: 200,
            metrics_window: 100,
            ignore_override: IgnoreOverride::Reject,
            bank_users: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let environment = lookup("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let store_backend = lookup("STORE_BACKEND")
            .map(|s| StoreBackend::parse(&s))
            .unwrap_or(Ok(StoreBackend::Postgres))?;

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let port = lookup("PORT")
            .unwrap_or_else(|| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.db_max_connections);

        let log_level = lookup("RUST_LOG").unwrap_or(defaults.log_level);

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS").filter(|s| !s.trim().is_empty());

        let auction_window_hours =
            parse_positive(&lookup, "AUCTION_WINDOW_HOURS", defaults.auction_window_hours)?;
        let sweep_interval_minutes =
            parse_positive(&lookup, "SWEEP_INTERVAL_MINUTES", defaults.sweep_interval_minutes)?;
        let graceful_stop_timeout_seconds = parse_positive(
            &lookup,
            "GRACEFUL_STOP_TIMEOUT_SECONDS",
            defaults.graceful_stop_timeout_seconds,
        )?;
        let sweep_batch_size = parse_positive(&lookup, "SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?;
        let metrics_window = parse_positive(&lookup, "METRICS_WINDOW", defaults.metrics_window)?;

        let max_purchasers_per_lead = match lookup("MAX_PURCHASERS_PER_LEAD") {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|cap| *cap > 0)
                    .ok_or_else(|| {
                        ConfigError::InvalidValue(format!(
                            "MAX_PURCHASERS_PER_LEAD must be a positive integer, got '{}'",
                            raw
                        ))
                    })?,
            ),
            _ => None,
        };

        let sweep_commit_max_retries = lookup("SWEEP_COMMIT_MAX_RETRIES")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.sweep_commit_max_retries);

        let sweep_retry_base_ms = lookup("SWEEP_RETRY_BASE_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.sweep_retry_base_ms);

        let ignore_override = match lookup("IGNORE_OVERRIDE") {
            Some(raw) => IgnoreOverride::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "Invalid IGNORE_OVERRIDE: '{}'. Expected: reject or allow",
                    raw
                ))
            })?,
            None => IgnoreOverride::Reject,
        };

        let bank_users = lookup("BANK_USERS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            database_url,
            store_backend,
            environment,
            port,
            db_max_connections,
            log_level,
            cors_allowed_origins,
            auction_window_hours,
            sweep_interval_minutes,
            max_purchasers_per_lead,
            graceful_stop_timeout_seconds,
            sweep_batch_size,
            sweep_commit_max_retries,
            sweep_retry_base_ms,
            metrics_window,
            ignore_override,
            bank_users,
        })
    }

    /// Get database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        let Some(url) = &self.database_url else {
            return "<unset>".to_string();
        };
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        url.clone()
    }

    pub fn auction_window(&self) -> Duration {
        Duration::hours(self.auction_window_hours)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_minutes * 60)
    }

    pub fn graceful_stop_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.graceful_stop_timeout_seconds)
    }

    pub fn lifecycle_rules(&self) -> LifecycleRules {
        LifecycleRules {
            max_purchasers: self.max_purchasers_per_lead,
            ignore_override: self.ignore_override,
        }
    }

    pub fn sweeper_settings(&self) -> SweeperSettings {
        SweeperSettings {
            batch_size: self.sweep_batch_size,
            max_retries: self.sweep_commit_max_retries,
            retry_base: StdDuration::from_millis(self.sweep_retry_base_ms),
            rules: self.lifecycle_rules(),
        }
    }
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .ok()
            .filter(|v| *v > T::default())
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!("{} must be a positive number, got '{}'", key, raw))
            }),
    }
}
