//! # Adapters
//!
//! - `postgres` - `sqlx` Postgres implementation of the sink port (feature `postgres`)

#[cfg(feature = "postgres")]
pub mod postgres;
