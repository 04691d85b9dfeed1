//! # Runtime Configuration
//!
//! Everything the consumer service needs, read once at startup. Mandatory
//! variables fail fast with the offending key in the error.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `AUDIT_CONSUMPTION_BATCH_SIZE` | required, > 0 |
//! | `AUDIT_CONSUMPTION_BATCH_FLUSH_INTERVAL_SEC` | required, > 0 |
//! | `BROKER_URL` | required |
//! | `DATABASE_URL` | required |
//! | `AUDIT_RECOVERY_INTERVAL_SEC` | 5 |
//! | `AUDIT_BUFFER_RETRY_INTERVAL_MS` | 1000 |
//! | `AUDIT_SHUTDOWN_GRACE_SEC` | 30 |
//! | `AUDIT_CLIENT_ID` | `audit-runtime` |

use std::time::Duration;

use audit_ingest::{BatcherConfig, ConsumerConfig, PoolSettings};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Complete consumer-service configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub batcher: BatcherConfig,
    pub consumer: ConsumerConfig,
    pub pool: PoolSettings,
    pub broker_url: String,
    pub database_url: String,
    pub client_id: String,
    /// Bound on the drain after a shutdown signal.
    pub shutdown_grace: Duration,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let capacity: usize = positive(&lookup, "AUDIT_CONSUMPTION_BATCH_SIZE")?;
        let flush_secs: u64 = positive(&lookup, "AUDIT_CONSUMPTION_BATCH_FLUSH_INTERVAL_SEC")?;
        let broker_url = required(&lookup, "BROKER_URL")?;
        let database_url = required(&lookup, "DATABASE_URL")?;

        let recovery_secs: u64 = parse_or(&lookup, "AUDIT_RECOVERY_INTERVAL_SEC", 5)?;
        if recovery_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "AUDIT_RECOVERY_INTERVAL_SEC",
                value: "0".to_string(),
            });
        }
        let retry_ms: u64 = parse_or(&lookup, "AUDIT_BUFFER_RETRY_INTERVAL_MS", 1000)?;
        let grace_secs: u64 = parse_or(&lookup, "AUDIT_SHUTDOWN_GRACE_SEC", 30)?;

        Ok(Self {
            batcher: BatcherConfig::new(capacity, Duration::from_secs(flush_secs))
                .with_recovery_interval(Duration::from_secs(recovery_secs)),
            consumer: ConsumerConfig {
                buffer_retry_interval: Duration::from_millis(retry_ms),
                ..ConsumerConfig::default()
            },
            pool: PoolSettings::default(),
            broker_url,
            database_url,
            client_id: lookup("AUDIT_CLIENT_ID").unwrap_or_else(|| "audit-runtime".to_string()),
            shutdown_grace: Duration::from_secs(grace_secs),
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

/// Parse a mandatory strictly positive integer.
fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = required(lookup, key)?;
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
