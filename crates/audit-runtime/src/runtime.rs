//! # Audit Runtime
//!
//! Assembles batcher and consumer around a broker and a sink, and runs
//! them until shutdown.
//!
//! ```text
//! shutdown.cancel() ──→ consumer unsubscribes ──→ batcher.close() (final flush)
//!         │
//!         └── grace timer: drain not finished in time → GraceExpired
//! ```

use std::sync::Arc;
use std::time::Duration;

use audit_bus::Broker;
use audit_ingest::{AuditConsumer, AuditSink, BatcherConfigError, BoundedBatcher, ConsumerError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RuntimeConfig;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("drain did not finish within {0:?}")]
    GraceExpired(Duration),

    #[error("consumer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The consumer service, ready to run.
pub struct AuditRuntime {
    consumer: Arc<AuditConsumer>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl AuditRuntime {
    /// Start the batcher and attach the consumer to `broker`.
    ///
    /// Nothing is subscribed until [`AuditRuntime::run`].
    pub fn assemble(
        config: &RuntimeConfig,
        broker: Arc<dyn Broker>,
        sink: Arc<dyn AuditSink>,
        shutdown: CancellationToken,
    ) -> Result<Self, BatcherConfigError> {
        let batcher = BoundedBatcher::start(config.batcher.clone(), sink, shutdown.clone())?;
        let consumer = AuditConsumer::new(broker, Arc::new(batcher), config.consumer.clone());
        Ok(Self {
            consumer: Arc::new(consumer),
            shutdown,
            grace: config.shutdown_grace,
        })
    }

    pub fn batcher(&self) -> &Arc<BoundedBatcher> {
        self.consumer.batcher()
    }

    /// Consume until the shutdown token fires, then drain within the grace
    /// period.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let consumer = Arc::clone(&self.consumer);
        let token = self.shutdown.clone();
        let mut task: JoinHandle<Result<(), ConsumerError>> =
            tokio::spawn(async move { consumer.run(token).await });

        tokio::select! {
            joined = &mut task => return Ok(joined??),
            _ = self.shutdown.cancelled() => {}
        }

        info!(grace = ?self.grace, "Draining audit buffer");
        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(joined) => {
                joined??;
                info!("Audit runtime stopped cleanly");
                Ok(())
            }
            Err(_) => {
                task.abort();
                error!(
                    grace = ?self.grace,
                    buffered = self.batcher().len(),
                    "Graceful shutdown timed out"
                );
                Err(RuntimeError::GraceExpired(self.grace))
            }
        }
    }
}
