//! Shared harness for the integration flows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audit_bus::{AuditPublisher, Backoff, InMemoryBroker, PublishPolicy};
use audit_ingest::{
    AuditConsumer, AuditSink, BatcherConfig, BoundedBatcher, ConsumerConfig, ConsumerError,
    InMemorySink, SinkError,
};
use audit_types::{AuditEvent, AUDIT_TOPIC};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Publish policy with millisecond-scale delays.
pub fn fast_policy() -> PublishPolicy {
    PublishPolicy {
        max_attempts: 50,
        backoff: Backoff::constant(Duration::from_millis(10)),
        liveness_poll: Duration::from_millis(10),
    }
}

pub fn publisher(broker: &Arc<InMemoryBroker>) -> AuditPublisher {
    AuditPublisher::new(broker.clone(), fast_policy(), CancellationToken::new())
}

pub fn account_event(i: usize) -> AuditEvent {
    AuditEvent::new(format!("event:account:{i}"), "PATCH")
}

/// Poll `condition` every 5ms until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Block until the broker has at least `count` members on the audit topic.
pub async fn wait_for_subscribers(broker: &InMemoryBroker, count: usize) {
    let ready = eventually(Duration::from_secs(2), || {
        broker.subscriber_count(AUDIT_TOPIC) >= count
    })
    .await;
    assert!(ready, "consumers did not subscribe");
}

/// A consumer and its batcher running against a broker.
pub struct Pipeline {
    pub batcher: Arc<BoundedBatcher>,
    pub shutdown: CancellationToken,
    consumer: JoinHandle<Result<(), ConsumerError>>,
}

impl Pipeline {
    pub fn start(
        broker: &Arc<InMemoryBroker>,
        sink: Arc<dyn AuditSink>,
        batcher: BatcherConfig,
        consumer: ConsumerConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let batcher = Arc::new(
            BoundedBatcher::start(batcher, sink, shutdown.clone()).expect("valid batcher config"),
        );
        let consumer = AuditConsumer::new(broker.clone(), Arc::clone(&batcher), consumer);
        let token = shutdown.clone();
        let consumer = tokio::spawn(async move { consumer.run(token).await });
        Self {
            batcher,
            shutdown,
            consumer,
        }
    }

    /// Cancel and wait for the drain to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.consumer
            .await
            .expect("consumer task panicked")
            .expect("consumer failed");
    }
}

/// Sink that holds every insert until released.
pub struct GatedSink {
    inner: InMemorySink,
    gate: Semaphore,
}

impl GatedSink {
    pub fn closed() -> Self {
        Self {
            inner: InMemorySink::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Let all current and future inserts through.
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn persisted(&self) -> &InMemorySink {
        &self.inner
    }
}

#[async_trait]
impl AuditSink for GatedSink {
    async fn insert(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        self.inner.insert(events).await
    }
}

/// Sink that takes `delay` for every insert.
pub struct SlowSink {
    inner: InMemorySink,
    delay: Duration,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemorySink::new(),
            delay,
        }
    }

    pub fn persisted(&self) -> &InMemorySink {
        &self.inner
    }
}

#[async_trait]
impl AuditSink for SlowSink {
    async fn insert(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert(events).await
    }
}
