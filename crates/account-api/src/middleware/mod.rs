//! # HTTP Middleware
//!
//! - `audit` - Emits one audit event per request on mutating routes
//!
//! Request ids, request tracing and timeouts come from `tower-http` layers
//! assembled in the router.

pub mod audit;

pub use audit::{audit_log, AuditState};
