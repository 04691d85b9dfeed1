//! # Audit Telemetry
//!
//! Observability for the audit pipeline.
//!
//! ## Components
//!
//! - **Logs**: `tracing` events rendered by `tracing-subscriber`, either
//!   human-readable or JSON (for log shippers)
//! - **Metrics**: Prometheus counters and gauges in a process-wide registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use audit_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `AUDIT_SERVICE_NAME` | `audit-pipeline` | Service name reported at startup |
//! | `AUDIT_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `AUDIT_JSON_LOGS` | `true` in containers | JSON formatted logs |
//! | `AUDIT_METRICS_PORT` | `9100` | Prometheus scrape port |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{encode_metrics, register_metrics};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and register all metrics.
///
/// Metric registration failure is not fatal for logging: logging is set up
/// first so the error can be reported.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    register_metrics()?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );
    Ok(())
}
