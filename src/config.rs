use serde::Deserialize;
use std::time::Duration;

use config::ConfigError;

use crate::idempotency::{IdempotencyHandlerConfig, DEFAULT_MAX_KEY_LENGTH};

/// One hundred years; keeps `created_at + ttl` representable.
const MAX_TTL_HOURS: i64 = 24 * 365 * 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
    pub seed_user: Option<SeedUserSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub ttl_hours: i64,
    pub sweep_interval_seconds: u64,
    pub key_header: String,
    pub max_key_length: usize,
}

/// User created at startup when its email is not registered yet.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUserSettings {
    pub name: String,
    pub email: String,
    pub password: String,
}

fn default_acquire_timeout() -> u64 {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            sweep_interval_seconds: 3600,
            key_header: "Request-Id".to_string(),
            max_key_length: 255,
        }
    }
}

impl IdempotencySettings {
    /// Records must outlive at least one hour of retries, and keys must fit
    /// the `idempotency_key` column.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_hours < 1 {
            return Err(ConfigError::Message(format!(
                "idempotency.ttl_hours must be at least 1, got {}",
                self.ttl_hours
            )));
        }
        self.ttl_seconds()?;

        if !(1..=DEFAULT_MAX_KEY_LENGTH).contains(&self.max_key_length) {
            return Err(ConfigError::Message(format!(
                "idempotency.max_key_length must be between 1 and {}, got {}",
                DEFAULT_MAX_KEY_LENGTH, self.max_key_length
            )));
        }

        if self.key_header.trim().is_empty() {
            return Err(ConfigError::Message("idempotency.key_header must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub fn handler_config(&self) -> Result<IdempotencyHandlerConfig, ConfigError> {
        self.validate()?;
        Ok(IdempotencyHandlerConfig {
            ttl_seconds: self.ttl_seconds()?,
        })
    }

    fn ttl_seconds(&self) -> Result<i64, ConfigError> {
        Some(self.ttl_hours)
            .filter(|hours| *hours <= MAX_TTL_HOURS)
            .and_then(|hours| hours.checked_mul(3600))
            .ok_or_else(|| {
                ConfigError::Message(format!("idempotency.ttl_hours {} is too large", self.ttl_hours))
            })
    }
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.idempotency.validate()?;
        Ok(settings)
    }
}
