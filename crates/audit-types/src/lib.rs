//! # Audit Types Crate
//!
//! Value types exchanged by every stage of the audit pipeline.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the JSON wire shape of [`AuditEvent`] is
//!   defined here and nowhere else.
//! - **Value Semantics**: events are moved or cloned across component
//!   boundaries, never shared behind a lock.
//! - **UTC Only**: timestamps are `DateTime<Utc>`, so a non-UTC instant
//!   cannot be represented.

pub mod event;

pub use event::{AuditEvent, DecodeError};

/// Broker topic carrying audit events.
pub const AUDIT_TOPIC: &str = "audit_logs";

/// Queue group shared by competing consumer instances.
pub const AUDIT_QUEUE_GROUP: &str = "audit_workers";

/// Event envelope version written into `spec_version`.
pub const SPEC_VERSION: &str = "1.0";

/// Default `source` of events emitted by the API tier.
pub const DEFAULT_SOURCE: &str = "backend.api";

/// Default `type` of audit events.
pub const DEFAULT_EVENT_TYPE: &str = "audit.event";
