//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name reported when telemetry starts
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive string
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Prometheus metrics port
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "audit-pipeline".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_port: 9100,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AUDIT_SERVICE_NAME`: Service name (default: audit-pipeline)
    /// - `AUDIT_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `AUDIT_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `AUDIT_METRICS_PORT`: Prometheus metrics port (default: 9100)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("AUDIT_SERVICE_NAME")
                .unwrap_or_else(|_| "audit-pipeline".to_string()),

            log_level: env::var("AUDIT_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("AUDIT_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            metrics_port: env::var("AUDIT_METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9100),
        }
    }

    /// Configuration for a named service, reading everything else from the
    /// environment.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        if env::var("AUDIT_SERVICE_NAME").is_err() {
            config.service_name = service_name.to_string();
        }
        config
    }
}
