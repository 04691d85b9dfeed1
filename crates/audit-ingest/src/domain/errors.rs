//! # Domain Errors
//!
//! Error types for the ingest side of the audit pipeline.
//!
//! | Error | Nature | Who recovers |
//! |-------|--------|--------------|
//! | `PushError::BufferFull` | transient backpressure | the pushing consumer, by retrying |
//! | `PushError::Closed` | terminal | nobody, the event is dropped |
//! | `SinkError::Unavailable` | transient outage | the batcher's recovery loop |
//! | `SinkError::Other` | permanent | nobody, the batch is dropped |

use audit_bus::BrokerError;
use audit_types::AuditEvent;
use thiserror::Error;

/// Rejection from [`crate::BoundedBatcher::push`]. The event is handed back.
#[derive(Debug, Error)]
pub enum PushError {
    /// The buffer is at capacity. A flush has been requested.
    #[error("audit batch buffer is full")]
    BufferFull(AuditEvent),

    /// The batcher is shutting down and accepts no more events.
    #[error("audit batcher is closed")]
    Closed(AuditEvent),
}

impl PushError {
    /// Take back the rejected event.
    pub fn into_event(self) -> AuditEvent {
        match self {
            PushError::BufferFull(event) | PushError::Closed(event) => event,
        }
    }

    pub fn is_buffer_full(&self) -> bool {
        matches!(self, PushError::BufferFull(_))
    }
}

/// Failure reported by an [`crate::AuditSink`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The store is unreachable or timed out. Worth retrying.
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    /// Any other failure. Retrying will not help.
    #[error("audit store error: {0}")]
    Other(String),
}

impl SinkError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Unavailable(_) => "unavailable",
            SinkError::Other(_) => "other",
        }
    }
}

/// Invalid [`crate::BatcherConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatcherConfigError {
    #[error("batch capacity must be positive")]
    ZeroCapacity,

    #[error("flush interval must be positive")]
    ZeroFlushInterval,

    #[error("recovery interval must be positive")]
    ZeroRecoveryInterval,
}

/// Errors from running the consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The queue subscription could not be created.
    #[error("failed to subscribe to audit topic: {0}")]
    Subscribe(#[from] BrokerError),
}
