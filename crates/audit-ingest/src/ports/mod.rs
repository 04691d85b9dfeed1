//! # Ports Layer
//!
//! - `outbound.rs` - Driven port: the durable audit store

pub mod outbound;
