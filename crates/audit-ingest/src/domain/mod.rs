//! # Domain Layer
//!
//! - `batcher` - Bounded buffer with size, timer and signal flush triggers
//! - `config` - Batcher settings
//! - `errors` - Push, sink, config and consumer errors

pub mod batcher;
pub mod config;
pub mod errors;
