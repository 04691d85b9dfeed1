//! # Audit Bus - Broker Transport for Audit Events
//!
//! Publish side and transport abstraction of the audit pipeline.
//!
//! ```text
//! ┌──────────────┐   dispatch()   ┌────────────────┐  publish()  ┌──────────┐
//! │ Request path │ ─────────────→ │ AuditPublisher │ ──────────→ │  Broker  │
//! └──────────────┘ (spawned task) └────────────────┘             └────┬─────┘
//!                                   waits for liveness,               │ queue group
//!                                   retries with backoff              ↓
//!                                                            MessageHandler (consumer)
//! ```
//!
//! ## Delivery
//!
//! - At-least-once: a retried publish may duplicate an event
//! - Queue groups: each message reaches exactly one member of each group
//! - Handlers of one subscription run one message at a time
//! - A message is acknowledged only after its handler returns
//!   [`Disposition::Ack`]; anything else goes back to the broker

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backoff;
pub mod broker;
pub mod dispatcher;
pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod publisher;

// Re-export main types
pub use backoff::Backoff;
pub use broker::{
    Acknowledger, Broker, BrokerError, Delivery, Disposition, MessageHandler, Subscription,
    DEFAULT_DELIVERY_CAPACITY,
};
pub use dispatcher::AuditDispatcher;
pub use memory::InMemoryBroker;
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBroker, MqttConfig};
pub use publisher::{AuditPublisher, PublishError, PublishPolicy};
