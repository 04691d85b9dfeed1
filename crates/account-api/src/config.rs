//! Service configuration from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use audit_bus::{Backoff, PublishPolicy};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Account API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
    pub broker_url: String,
    pub client_id: String,
    pub publish_policy: PublishPolicy,
    pub request_timeout: Duration,
    /// Bound on draining in-flight requests after a shutdown signal.
    pub shutdown_grace: Duration,
}

impl ApiConfig {
    /// Read `BROKER_URL` (required), `ACCOUNT_API_ADDR`,
    /// `AUDIT_PUBLISH_MAX_ATTEMPTS`, `AUDIT_PUBLISH_BASE_DELAY_MS` and
    /// `AUDIT_CLIENT_ID`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ApiConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let broker_url = lookup("BROKER_URL").ok_or(ConfigError::Missing("BROKER_URL"))?;
        let listen_addr = parse_or(&lookup, "ACCOUNT_API_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let max_attempts: u32 = parse_or(&lookup, "AUDIT_PUBLISH_MAX_ATTEMPTS", 10)?;
        let base_delay_ms: u64 = parse_or(&lookup, "AUDIT_PUBLISH_BASE_DELAY_MS", 2000)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "AUDIT_PUBLISH_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let publish_policy = PublishPolicy {
            max_attempts,
            backoff: Backoff {
                first: Duration::from_millis(base_delay_ms),
                ..Backoff::default()
            },
            ..PublishPolicy::default()
        };

        Ok(Self {
            listen_addr,
            broker_url,
            client_id: lookup("AUDIT_CLIENT_ID").unwrap_or_else(|| "account-api".to_string()),
            publish_policy,
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
        })
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
