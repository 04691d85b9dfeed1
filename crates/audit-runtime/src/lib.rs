//! # Audit Runtime Library
//!
//! Wiring for the audit consumer service. The entry point is the
//! `audit-runtime` binary; the pieces live here so they can be tested
//! against in-memory brokers and sinks.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging, metrics)
//! 2. Load [`RuntimeConfig`] from the environment, failing fast on missing keys
//! 3. Connect the Postgres sink and ensure the schema
//! 4. Connect to the broker
//! 5. Assemble and run the [`AuditRuntime`] until SIGINT/SIGTERM/SIGHUP/SIGQUIT

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod metrics_server;
pub mod runtime;

pub use config::{ConfigError, RuntimeConfig};
pub use metrics_server::serve_metrics;
pub use runtime::{AuditRuntime, RuntimeError};
