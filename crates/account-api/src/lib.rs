//! # Account API
//!
//! HTTP front of the audit pipeline. Every request on an audited route
//! produces one audit event, published in the background so the response
//! never waits for the broker.
//!
//! ```text
//! PATCH /accounts/:id ──→ audit_log middleware ──→ patch_account ──→ AccountService
//!                               │ (after the response is built)
//!                               ↓
//!                         AuditDispatcher::dispatch ──spawn──→ AuditPublisher ──→ Broker
//! ```
//!
//! A failed publish is logged and counted; it never changes the response.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod domain;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use config::{ApiConfig, ConfigError};
pub use domain::account::{Account, AccountError, AccountService, InMemoryAccounts};
pub use router::build_router;
pub use server::serve;
