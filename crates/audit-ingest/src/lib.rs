//! # Audit Ingest - Batching Consumer for Audit Events
//!
//! Subscribe side of the audit pipeline: takes events off the broker,
//! buffers them and persists them in batches.
//!
//! ```text
//! Broker ──→ AuditConsumer ──push──→ BoundedBatcher ──insert(batch)──→ AuditSink
//!             (backpressure            (size / timer / signal            (Postgres)
//!              retry)                   flush, recovery loop)
//! ```
//!
//! ## Failure Domains
//!
//! | Failure | Handling |
//! |---------|----------|
//! | Buffer saturated | `BufferFull`, consumer waits and pushes again |
//! | Store unavailable | batch handed to a recovery task, retried on a fixed interval |
//! | Store rejects batch | logged, batch dropped |
//! | Malformed message | logged, message dropped |
//! | Shutdown | intake stops, buffer is flushed, pending recoveries are abandoned |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Batcher, its configuration and the error taxonomy
//! - `ports/` - The sink port and its in-memory implementation
//! - `adapters/` - Postgres sink
//! - `consumer.rs` - Broker subscription feeding the batcher

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod consumer;
pub mod domain;
pub mod ports;

// Re-export main types
pub use consumer::{AuditConsumer, ConsumerConfig};
pub use domain::batcher::BoundedBatcher;
pub use domain::config::BatcherConfig;
pub use domain::errors::{BatcherConfigError, ConsumerError, PushError, SinkError};
pub use ports::outbound::{AuditSink, InMemorySink};

#[cfg(feature = "postgres")]
pub use adapters::postgres::{PoolSettings, PostgresSink};
