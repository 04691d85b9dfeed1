//! # Reliable Publisher
//!
//! Hands one audit event to the broker.
//!
//! ## Attempt Loop
//!
//! ```text
//! for attempt in 1..=max_attempts:
//!     wait until broker is live (poll every `liveness_poll`)   ── shutdown → Aborted
//!     publish                                                  ── ok → return
//!     if not last: sleep backoff.delay(attempt - 1)            ── shutdown → Aborted
//! return Exhausted
//! ```

use std::sync::Arc;
use std::time::Duration;

use audit_telemetry::metrics::{EVENTS_PUBLISHED, PUBLISH_FAILURES};
use audit_types::{AuditEvent, AUDIT_TOPIC};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::broker::{Broker, BrokerError};

/// Errors from [`AuditPublisher::publish`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// Shutdown fired while waiting for the broker or between attempts.
    #[error("publish aborted by shutdown")]
    Aborted,

    /// The event could not be encoded.
    #[error("failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every attempt failed.
    #[error("publish failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: BrokerError,
    },
}

/// Retry policy for the publisher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishPolicy {
    /// Total publish attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between failed attempts.
    pub backoff: Backoff,
    /// How often broker liveness is polled while disconnected.
    pub liveness_poll: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::default(),
            liveness_poll: Duration::from_secs(1),
        }
    }
}

/// Publishes audit events with liveness gating and bounded retries.
pub struct AuditPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
    policy: PublishPolicy,
    shutdown: CancellationToken,
}

impl AuditPublisher {
    /// Publisher on the audit topic. `shutdown` is the process-wide signal.
    pub fn new(broker: Arc<dyn Broker>, policy: PublishPolicy, shutdown: CancellationToken) -> Self {
        Self {
            broker,
            topic: AUDIT_TOPIC.to_string(),
            policy,
            shutdown,
        }
    }

    /// Publish on `topic` instead of the audit topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn policy(&self) -> &PublishPolicy {
        &self.policy
    }

    /// Publish one event, assigning an id first if it has none.
    pub async fn publish(&self, mut event: AuditEvent) -> Result<(), PublishError> {
        event.ensure_id();
        let payload = event.to_json()?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = BrokerError::Disconnected;

        for attempt in 1..=max_attempts {
            self.wait_until_connected().await?;

            match self.broker.publish(&self.topic, payload.clone()).await {
                Ok(()) => {
                    EVENTS_PUBLISHED.inc();
                    info!(event_id = event.id(), attempt, "Audit event published");
                    return Ok(());
                }
                Err(e) => {
                    PUBLISH_FAILURES.inc();
                    warn!(
                        event_id = event.id(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Audit event publish failed"
                    );
                    last_error = e;
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.backoff.delay(attempt - 1);
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Err(PublishError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(PublishError::Exhausted {
            attempts: max_attempts,
            source: last_error,
        })
    }

    /// Suspend until the broker reports liveness, or abort on shutdown.
    async fn wait_until_connected(&self) -> Result<(), PublishError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(PublishError::Aborted);
            }
            if self.broker.is_connected() {
                return Ok(());
            }
            debug!("Broker not connected, waiting");
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(PublishError::Aborted),
                _ = tokio::time::sleep(self.policy.liveness_poll) => {}
            }
        }
    }
}
