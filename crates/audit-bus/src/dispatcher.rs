//! Fire-and-forget publishing for the request path.
//!
//! Each dispatched event gets its own task. The caller never waits on the
//! broker; a failed publish is logged and counted as dropped.

use std::sync::Arc;

use audit_telemetry::metrics::{drop_reason, record_dropped};
use audit_types::AuditEvent;
use tokio::task::JoinHandle;
use tracing::error;

use crate::publisher::{AuditPublisher, PublishError};

/// Spawns one background publish per event.
#[derive(Clone)]
pub struct AuditDispatcher {
    publisher: Arc<AuditPublisher>,
}

impl AuditDispatcher {
    pub fn new(publisher: Arc<AuditPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish `event` in the background.
    ///
    /// The handle is only useful to tests and shutdown code; request
    /// handlers drop it. Must be called inside a Tokio runtime.
    pub fn dispatch(&self, event: AuditEvent) -> JoinHandle<()> {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            let event_id = event.id().to_string();
            match publisher.publish(event).await {
                Ok(()) => {}
                Err(PublishError::Aborted) => {
                    record_dropped(drop_reason::PUBLISH_FAILED, 1);
                    error!(event_id = %event_id, "Audit publish aborted by shutdown");
                }
                Err(e) => {
                    record_dropped(drop_reason::PUBLISH_FAILED, 1);
                    error!(event_id = %event_id, error = %e, "failure to publish audit event");
                }
            }
        })
    }
}
