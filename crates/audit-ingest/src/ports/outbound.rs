//! # Outbound Ports (Driven Ports)
//!
//! The durable store the batcher flushes into.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use audit_types::AuditEvent;
use parking_lot::Mutex;

use crate::domain::errors::SinkError;

/// Abstract interface for the audit store.
///
/// Production: `PostgresSink` (adapters/postgres.rs)
/// Testing: `InMemorySink` (below)
///
/// Implementations must be safe to call concurrently: recovery loops retry
/// failed batches while the flush loop keeps inserting new ones.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Insert a batch. An empty batch is a no-op success.
    ///
    /// Connectivity problems and timeouts must be reported as
    /// [`SinkError::Unavailable`]; everything else as [`SinkError::Other`].
    async fn insert(&self, events: &[AuditEvent]) -> Result<(), SinkError>;
}

/// In-memory sink with outage simulation.
pub struct InMemorySink {
    batches: Mutex<Vec<Vec<AuditEvent>>>,
    available: AtomicBool,
    scripted_failures: Mutex<VecDeque<SinkError>>,
    insert_attempts: AtomicUsize,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            scripted_failures: Mutex::new(VecDeque::new()),
            insert_attempts: AtomicUsize::new(0),
        }
    }

    /// While unavailable every insert fails with [`SinkError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next insert with `error`. Queued failures apply in order
    /// and take precedence over availability.
    pub fn fail_next(&self, error: SinkError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Accepted batches, in acceptance order.
    pub fn batches(&self) -> Vec<Vec<AuditEvent>> {
        self.batches.lock().clone()
    }

    /// All accepted events, flattened.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn event_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }

    /// Calls to `insert` with a non-empty batch, successful or not.
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemorySink {
    async fn insert(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("sink offline".to_string()));
        }

        self.batches.lock().push(events.to_vec());
        Ok(())
    }
}
