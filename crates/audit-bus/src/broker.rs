//! # Broker Port
//!
//! The pub/sub transport the pipeline depends on. Implementations:
//!
//! - Production: `MqttBroker` (feature `mqtt`)
//! - Testing: `InMemoryBroker`

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use audit_telemetry::metrics::DELIVERIES_REQUEUED;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors from broker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The connection to the broker is down.
    #[error("broker is disconnected")]
    Disconnected,

    /// The broker refused or failed the publish.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// The subscription could not be registered.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The broker client was shut down.
    #[error("broker client closed")]
    Closed,

    /// Invalid connection settings.
    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),
}

/// Local queue depth per subscription when the adapter is not told otherwise.
pub const DEFAULT_DELIVERY_CAPACITY: usize = 64;

/// What a handler did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed or deliberately discarded: the broker may forget it.
    Ack,
    /// Not processed: hand it back so it is delivered again.
    Requeue,
}

/// Broker-side settlement of one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self);

    /// Give the message back unprocessed.
    async fn requeue(&self, payload: Vec<u8>);
}

/// One message routed to a subscription. Settled exactly once, after the
/// handler returns or when the subscription stops before handling it.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Discard the settlement handle and keep the body.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    async fn settle(self, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.acker.ack().await,
            Disposition::Requeue => {
                DELIVERIES_REQUEUED.inc();
                self.acker.requeue(self.payload).await;
            }
        }
    }
}

/// Callback invoked once per delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message body and say whether it may be acknowledged.
    async fn handle(&self, payload: &[u8]) -> Disposition;
}

/// Trait for the pub/sub transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Publish one message body on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Join the queue `group` on `topic`. Each message is delivered to one
    /// member of every group.
    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BrokerError>;

    /// Leave the group and stop the subscription's dispatch worker.
    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BrokerError>;
}

/// A live queue subscription.
///
/// Owns the worker that feeds delivered messages to the handler one at a
/// time. A message is acknowledged only after the handler returns
/// [`Disposition::Ack`]. Messages still queued locally when the
/// subscription stops are requeued, never dropped.
pub struct Subscription {
    id: u64,
    topic: String,
    group: String,
    stop: CancellationToken,
    worker: JoinHandle<()>,
}

impl Subscription {
    /// Start the dispatch worker for a subscription fed by `receiver`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(
        id: u64,
        topic: impl Into<String>,
        group: impl Into<String>,
        receiver: mpsc::Receiver<Delivery>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let stop = CancellationToken::new();
        let worker = tokio::spawn(dispatch(id, receiver, handler, stop.clone()));
        Self {
            id,
            topic: topic.into(),
            group: group.into(),
            stop,
            worker,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Stop the dispatch worker, wait for the in-flight handler call and
    /// requeue whatever is still queued.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.worker.await {
            warn!(subscription = self.id, error = %e, "Dispatch worker ended abnormally");
        }
    }
}

async fn dispatch(
    id: u64,
    mut receiver: mpsc::Receiver<Delivery>,
    handler: Arc<dyn MessageHandler>,
    stop: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            delivery = receiver.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };
        let disposition = handler.handle(delivery.payload()).await;
        delivery.settle(disposition).await;
    }

    receiver.close();
    let mut returned: usize = 0;
    while let Ok(delivery) = receiver.try_recv() {
        delivery.settle(Disposition::Requeue).await;
        returned += 1;
    }
    if returned > 0 {
        warn!(subscription = id, returned, "Returned unhandled deliveries to the broker");
    }
    debug!(subscription = id, "Dispatch worker stopped");
}
