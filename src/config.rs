//! Queue configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional TOML file, then environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the durable job collections live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[serde(rename_all = "camelCase")]
    Redis {
        #[serde(default = "default_redis_host")]
        host: String,
        #[serde(default = "default_redis_port")]
        port: u16,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        db: i64,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
    Sqlite {
        url: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_key_prefix() -> String {
    "jobs".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub store: StoreConfig,
    /// Attempts a job gets unless the enqueue call says otherwise.
    pub max_retries: u32,
    /// Base of the exponential retry backoff.
    pub retry_delay_ms: u64,
    pub job_timeout_ms: u64,
    /// Ceiling on jobs dispatched but not yet resolved.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// Pause after the store reports an error.
    pub error_backoff_ms: u64,
    /// Completed and failed records older than this are pruned by cleanup.
    pub retention_days: u32,
    pub stats_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            max_retries: 3,
            retry_delay_ms: 5_000,
            job_timeout_ms: 30_000,
            concurrency: 5,
            poll_interval_ms: 1_000,
            error_backoff_ms: 1_000,
            retention_days: 30,
            stats_interval_ms: 60_000,
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file and then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: QueueConfig = toml::from_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for deployments without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = QueueConfig::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let StoreConfig::Redis {
            host,
            port,
            password,
            db,
            ..
        } = &mut self.store
        {
            if let Some(value) = lookup("REDIS_HOST") {
                *host = value;
            }
            if let Some(value) = lookup("REDIS_PORT") {
                *port = parse_env("REDIS_PORT", value)?;
            }
            if let Some(value) = lookup("REDIS_PASSWORD") {
                *password = Some(value);
            }
            if let Some(value) = lookup("REDIS_DB") {
                *db = parse_env("REDIS_DB", value)?;
            }
        }

        if let Some(value) = lookup("JOB_MAX_RETRIES") {
            self.max_retries = parse_env("JOB_MAX_RETRIES", value)?;
        }
        if let Some(value) = lookup("JOB_RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_env("JOB_RETRY_DELAY_MS", value)?;
        }
        if let Some(value) = lookup("JOB_TIMEOUT_MS") {
            self.job_timeout_ms = parse_env("JOB_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("JOB_CONCURRENCY") {
            self.concurrency = parse_env("JOB_CONCURRENCY", value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.job_timeout_ms == 0 {
            return Err(ConfigError::Invalid("jobTimeoutMs must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("maxRetries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value,
    })
}
