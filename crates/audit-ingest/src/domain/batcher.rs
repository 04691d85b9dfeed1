//! # Bounded Batcher
//!
//! Buffers audit events in memory and flushes them to an [`AuditSink`].
//!
//! ## Flush Triggers
//!
//! ```text
//! push() fills buffer ──┐
//! push() on full buffer ┼─→ flush signal ─┐
//! request_flush() ──────┘  (coalesced)    │
//!                                         ├─→ flush loop ──swap──→ Sink.insert(batch)
//! interval tick ──────────────────────────┘                          │
//!                                                 Unavailable ──→ recovery task
//!                                                                 (fixed interval,
//!                                                                  until ok or shutdown)
//! ```
//!
//! ## Invariants
//!
//! - The buffer never holds more than `capacity` events
//! - The buffer lock is held only to append or to swap, never across sink I/O
//! - Each flush sends exactly the events appended since the previous swap,
//!   in arrival order
//! - Once closed, every push is rejected and no further flush happens

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audit_telemetry::metrics::{
    drop_reason, record_dropped, BATCHES_FLUSHED, BUFFER_FULL, EVENTS_BUFFERED,
    EVENTS_PERSISTED, RECOVERY_TASKS, SINK_FAILURES,
};
use audit_types::AuditEvent;
use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::BatcherConfig;
use super::errors::{BatcherConfigError, PushError, SinkError};
use crate::ports::outbound::AuditSink;

/// What woke the flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Capacity,
    Timer,
    Signal,
    Close,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Capacity => "capacity",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Signal => "signal",
            FlushTrigger::Close => "close",
        }
    }
}

struct BufferState {
    events: Vec<AuditEvent>,
    closed: bool,
}

/// State shared between the handle, the flush loop and recovery tasks.
struct Shared {
    config: BatcherConfig,
    buffer: Mutex<BufferState>,
    /// Single-permit wakeup: any number of requests before the loop
    /// wakes collapse into one flush.
    flush_signal: Notify,
    /// Set by `push` when the pending signal was raised by a full buffer.
    capacity_reached: AtomicBool,
    sink: Arc<dyn AuditSink>,
    shutdown: CancellationToken,
    recoveries: AtomicUsize,
}

/// Bounded in-memory batcher with a background flush loop.
pub struct BoundedBatcher {
    shared: Arc<Shared>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed_once: OnceCell<()>,
}

impl BoundedBatcher {
    /// Validate `config` and start the flush loop.
    ///
    /// `shutdown` is the process-wide signal: it stops the flush loop and
    /// makes recovery tasks give up. Must be called inside a Tokio runtime.
    pub fn start(
        config: BatcherConfig,
        sink: Arc<dyn AuditSink>,
        shutdown: CancellationToken,
    ) -> Result<Self, BatcherConfigError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            buffer: Mutex::new(BufferState {
                events: Vec::with_capacity(config.capacity),
                closed: false,
            }),
            config,
            flush_signal: Notify::new(),
            capacity_reached: AtomicBool::new(false),
            sink,
            shutdown: shutdown.clone(),
            recoveries: AtomicUsize::new(0),
        });

        let stop = shutdown.child_token();
        let worker = tokio::spawn(flush_loop(Arc::clone(&shared), stop.clone()));

        info!(
            capacity = shared.config.capacity,
            flush_interval_ms = shared.config.flush_interval.as_millis() as u64,
            "Audit batcher started"
        );

        Ok(Self {
            shared,
            stop,
            worker: Mutex::new(Some(worker)),
            closed_once: OnceCell::new(),
        })
    }

    /// Append one event without blocking on I/O.
    ///
    /// A full buffer rejects the event with [`PushError::BufferFull`] after
    /// requesting a flush, so a retry after a short pause is likely to
    /// succeed. The push that fills the buffer also requests a flush.
    pub fn push(&self, event: AuditEvent) -> Result<(), PushError> {
        let capacity = self.shared.config.capacity;
        let mut buffer = self.shared.buffer.lock();

        if buffer.closed {
            return Err(PushError::Closed(event));
        }
        if buffer.events.len() >= capacity {
            drop(buffer);
            self.shared.signal_capacity();
            BUFFER_FULL.inc();
            warn!(capacity, "Audit buffer full, emergency flush requested");
            return Err(PushError::BufferFull(event));
        }

        buffer.events.push(event);
        let filled = buffer.events.len() == capacity;
        drop(buffer);

        EVENTS_BUFFERED.inc();
        if filled {
            debug!(capacity, "Audit buffer reached capacity");
            self.shared.signal_capacity();
        }
        Ok(())
    }

    /// Ask the flush loop to flush now. Coalesces with pending requests.
    pub fn request_flush(&self) {
        self.shared.flush_signal.notify_one();
    }

    /// Stop accepting events, flush what is buffered and stop the loop.
    ///
    /// Idempotent: concurrent and repeated calls wait for the single
    /// close to complete.
    pub async fn close(&self) {
        self.closed_once
            .get_or_init(|| async {
                self.shared.buffer.lock().closed = true;

                // The loop finishes any flush in progress before it exits,
                // so the final flush below cannot overtake it.
                self.stop.cancel();
                let worker = self.worker.lock().take();
                if let Some(worker) = worker {
                    if let Err(e) = worker.await {
                        error!(error = %e, "Audit flush loop ended abnormally");
                    }
                }

                self.shared.flush(FlushTrigger::Close).await;
                info!("Audit batcher closed");
            })
            .await;
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.shared.buffer.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.buffer.lock().closed
    }

    /// Recovery tasks still retrying a batch.
    pub fn recoveries_in_flight(&self) -> usize {
        self.shared.recoveries.load(Ordering::SeqCst)
    }
}

impl Drop for BoundedBatcher {
    fn drop(&mut self) {
        self.stop.cancel();
        let pending = self.shared.buffer.lock().events.len();
        if pending > 0 {
            record_dropped(drop_reason::CLOSED, pending);
            warn!(count = pending, "Audit batcher dropped without close, buffered events lost");
        }
    }
}

async fn flush_loop(shared: Arc<Shared>, stop: CancellationToken) {
    let period = shared.config.flush_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let trigger = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = shared.flush_signal.notified() => shared.signal_trigger(),
            _ = ticker.tick() => FlushTrigger::Timer,
        };
        shared.flush(trigger).await;
    }
    debug!("Audit flush loop stopped");
}

impl Shared {
    fn signal_capacity(&self) {
        self.capacity_reached.store(true, Ordering::SeqCst);
        self.flush_signal.notify_one();
    }

    /// Attribute a woken signal: a full buffer wins over an explicit request.
    fn signal_trigger(&self) -> FlushTrigger {
        if self.capacity_reached.swap(false, Ordering::SeqCst) {
            FlushTrigger::Capacity
        } else {
            FlushTrigger::Signal
        }
    }

    /// Swap the buffer out and hand the snapshot to the sink.
    async fn flush(self: &Arc<Self>, trigger: FlushTrigger) {
        let batch = {
            let mut buffer = self.buffer.lock();
            let fresh = if buffer.closed {
                Vec::new()
            } else {
                Vec::with_capacity(self.config.capacity)
            };
            std::mem::replace(&mut buffer.events, fresh)
        };
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        BATCHES_FLUSHED.with_label_values(&[trigger.as_str()]).inc();
        debug!(count, trigger = trigger.as_str(), "Flushing audit batch");

        match self.sink.insert(&batch).await {
            Ok(()) => {
                EVENTS_PERSISTED.inc_by(count as f64);
                debug!(count, "Audit batch persisted");
            }
            Err(e @ SinkError::Unavailable(_)) => {
                SINK_FAILURES.with_label_values(&[e.kind()]).inc();
                warn!(count, error = %e, "Audit store unavailable, handing batch to recovery");
                self.spawn_recovery(batch);
            }
            Err(e) => {
                SINK_FAILURES.with_label_values(&[e.kind()]).inc();
                record_dropped(drop_reason::SINK_REJECTED, count);
                error!(count, error = %e, "Audit batch rejected by store, dropped");
            }
        }
    }

    fn spawn_recovery(self: &Arc<Self>, batch: Vec<AuditEvent>) {
        let in_flight = self.recoveries.fetch_add(1, Ordering::SeqCst) + 1;
        RECOVERY_TASKS.inc();
        if in_flight > self.config.recovery_warn_threshold {
            warn!(
                in_flight,
                threshold = self.config.recovery_warn_threshold,
                "Audit recovery tasks accumulating"
            );
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            recover(
                shared.sink.as_ref(),
                &batch,
                shared.config.recovery_interval,
                &shared.shutdown,
            )
            .await;
            shared.recoveries.fetch_sub(1, Ordering::SeqCst);
            RECOVERY_TASKS.dec();
        });
    }
}

/// Retry `batch` every `interval` until the sink accepts it or shutdown.
async fn recover(
    sink: &dyn AuditSink,
    batch: &[AuditEvent],
    interval: Duration,
    shutdown: &CancellationToken,
) {
    let count = batch.len();
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                record_dropped(drop_reason::RECOVERY_ABANDONED, count);
                error!(count, attempt, "Shutdown during audit recovery, batch dropped");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        attempt += 1;
        match sink.insert(batch).await {
            Ok(()) => {
                EVENTS_PERSISTED.inc_by(count as f64);
                info!(count, attempt, "Audit batch recovered");
                return;
            }
            Err(e) => {
                SINK_FAILURES.with_label_values(&[e.kind()]).inc();
                warn!(count, attempt, error = %e, "Audit recovery attempt failed");
            }
        }
    }
}
