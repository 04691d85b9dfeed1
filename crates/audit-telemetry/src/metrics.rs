//! Prometheus metrics for the audit pipeline.
//!
//! All metrics follow the naming convention: `audit_<metric>_<unit>`
//!
//! Metrics are usable before [`register_metrics`] runs; registration only
//! makes them visible to [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

/// Reason label for `audit_events_dropped_total`.
pub mod drop_reason {
    pub const DECODE: &str = "decode";
    pub const CLOSED: &str = "closed";
    pub const SINK_REJECTED: &str = "sink_rejected";
    pub const RECOVERY_ABANDONED: &str = "recovery_abandoned";
    pub const PUBLISH_FAILED: &str = "publish_failed";
}

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUBLISH SIDE
    // =========================================================================

    /// Events handed to the broker
    pub static ref EVENTS_PUBLISHED: Counter = Counter::new(
        "audit_events_published_total",
        "Total audit events accepted by the broker"
    ).expect("metric creation failed");

    /// Deliveries handed back to the broker unprocessed
    pub static ref DELIVERIES_REQUEUED: Counter = Counter::new(
        "audit_deliveries_requeued_total",
        "Total broker deliveries returned for redelivery instead of acknowledged"
    ).expect("metric creation failed");

    /// Failed publish attempts (each retry counts)
    pub static ref PUBLISH_FAILURES: Counter = Counter::new(
        "audit_publish_failures_total",
        "Total failed publish attempts"
    ).expect("metric creation failed");

    // =========================================================================
    // BATCHER
    // =========================================================================

    /// Events appended to the buffer
    pub static ref EVENTS_BUFFERED: Counter = Counter::new(
        "audit_events_buffered_total",
        "Total audit events appended to the batch buffer"
    ).expect("metric creation failed");

    /// Pushes rejected because the buffer was full
    pub static ref BUFFER_FULL: Counter = Counter::new(
        "audit_buffer_full_total",
        "Total pushes rejected with a full buffer"
    ).expect("metric creation failed");

    /// Flushes by trigger (capacity/timer/signal/close)
    pub static ref BATCHES_FLUSHED: CounterVec = CounterVec::new(
        Opts::new("audit_batches_flushed_total", "Non-empty flushes by trigger"),
        &["trigger"]
    ).expect("metric creation failed");

    /// Events accepted by the sink
    pub static ref EVENTS_PERSISTED: Counter = Counter::new(
        "audit_events_persisted_total",
        "Total audit events accepted by the sink"
    ).expect("metric creation failed");

    /// Sink failures by classification
    pub static ref SINK_FAILURES: CounterVec = CounterVec::new(
        Opts::new("audit_sink_failures_total", "Sink insert failures by kind"),
        &["kind"]  // unavailable / other
    ).expect("metric creation failed");

    /// Recovery loops currently retrying a batch
    pub static ref RECOVERY_TASKS: Gauge = Gauge::new(
        "audit_recovery_tasks_in_flight",
        "Recovery loops currently retrying a failed batch"
    ).expect("metric creation failed");

    // =========================================================================
    // DATA LOSS
    // =========================================================================

    /// Events dropped by reason
    pub static ref EVENTS_DROPPED: CounterVec = CounterVec::new(
        Opts::new("audit_events_dropped_total", "Audit events dropped by reason"),
        &["reason"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Fails if called twice in the same process.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(DELIVERIES_REQUEUED.clone()),
        Box::new(EVENTS_BUFFERED.clone()),
        Box::new(BUFFER_FULL.clone()),
        Box::new(BATCHES_FLUSHED.clone()),
        Box::new(EVENTS_PERSISTED.clone()),
        Box::new(SINK_FAILURES.clone()),
        Box::new(RECOVERY_TASKS.clone()),
        Box::new(EVENTS_DROPPED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(())
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Count `count` events dropped for `reason`.
pub fn record_dropped(reason: &str, count: usize) {
    EVENTS_DROPPED
        .with_label_values(&[reason])
        .inc_by(count as f64);
}
