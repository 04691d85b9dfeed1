//! # Audit Consumer
//!
//! Bridges broker deliveries into the [`BoundedBatcher`].
//!
//! ```text
//! Broker ──(queue group)──→ IngestHandler::handle(bytes)
//!                              │ decode (malformed → dropped, acked)
//!                              ↓
//!                           batcher.push ── Ok         → acked
//!                                        ── BufferFull → wait, push again
//!                                        ── Closed     → requeued
//! ```
//!
//! A delivery is acknowledged only once its event is in the batcher.
//! Shutdown while waiting on backpressure requeues the event, and the
//! subscription requeues whatever is still queued locally, so nothing the
//! broker delivered is lost at shutdown.
//!
//! Shutdown order: unsubscribe (stop intake), then close the batcher
//! (final flush).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audit_bus::{Broker, Disposition, MessageHandler};
use audit_telemetry::metrics::{drop_reason, record_dropped};
use audit_types::{AuditEvent, AUDIT_QUEUE_GROUP, AUDIT_TOPIC};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::batcher::BoundedBatcher;
use crate::domain::errors::{ConsumerError, PushError};

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Pause before retrying a push rejected with a full buffer.
    pub buffer_retry_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: AUDIT_TOPIC.to_string(),
            group: AUDIT_QUEUE_GROUP.to_string(),
            buffer_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Subscribes to the audit topic and feeds the batcher until shutdown.
pub struct AuditConsumer {
    broker: Arc<dyn Broker>,
    batcher: Arc<BoundedBatcher>,
    config: ConsumerConfig,
}

impl AuditConsumer {
    pub fn new(broker: Arc<dyn Broker>, batcher: Arc<BoundedBatcher>, config: ConsumerConfig) -> Self {
        Self {
            broker,
            batcher,
            config,
        }
    }

    pub fn batcher(&self) -> &Arc<BoundedBatcher> {
        &self.batcher
    }

    /// Consume until `shutdown` fires, then drain.
    ///
    /// The batcher is closed on every exit path, including a failed
    /// subscription.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let handler = Arc::new(IngestHandler {
            batcher: Arc::clone(&self.batcher),
            retry_interval: self.config.buffer_retry_interval,
            shutdown: shutdown.clone(),
        });

        let subscription = match self
            .broker
            .queue_subscribe(&self.config.topic, &self.config.group, handler)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.batcher.close().await;
                return Err(e.into());
            }
        };
        info!(
            topic = %self.config.topic,
            group = %self.config.group,
            "Audit consumer subscribed"
        );

        shutdown.cancelled().await;
        info!("Shutdown requested, stopping audit intake");

        if let Err(e) = self.broker.unsubscribe(subscription).await {
            warn!(error = %e, "Failed to unsubscribe audit consumer");
        }
        self.batcher.close().await;

        info!("Audit consumer stopped");
        Ok(())
    }
}

/// Per-message callback registered with the broker.
struct IngestHandler {
    batcher: Arc<BoundedBatcher>,
    retry_interval: Duration,
    shutdown: CancellationToken,
}

#[async_trait]
impl MessageHandler for IngestHandler {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        match AuditEvent::from_json(payload) {
            Ok(event) => self.ingest(event).await,
            Err(e) => {
                record_dropped(drop_reason::DECODE, 1);
                error!(error = %e, bytes = payload.len(), "Dropping malformed audit message");
                Disposition::Ack
            }
        }
    }
}

impl IngestHandler {
    /// Push `event`, waiting out backpressure until it fits. Gives the
    /// event back to the broker if the batcher closes or shutdown fires.
    async fn ingest(&self, mut event: AuditEvent) -> Disposition {
        let mut attempt: u32 = 0;
        loop {
            match self.batcher.push(event) {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(attempt, "Audit event buffered after backpressure");
                    }
                    return Disposition::Ack;
                }
                Err(PushError::Closed(rejected)) => {
                    warn!(event_id = rejected.id(), "Audit batcher closed, event returned to broker");
                    return Disposition::Requeue;
                }
                Err(PushError::BufferFull(rejected)) => {
                    attempt += 1;
                    warn!(
                        event_id = rejected.id(),
                        attempt,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "Audit buffer full, retrying push"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            warn!(event_id = rejected.id(), "Shutdown while waiting for buffer space, event returned to broker");
                            return Disposition::Requeue;
                        }
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                    event = rejected;
                }
            }
        }
    }
}
