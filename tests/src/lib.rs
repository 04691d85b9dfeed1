//! # Audit Pipeline Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Shared harness: broker, sinks, polling helpers
//! └── integration/      # Cross-crate flows
//!     ├── pipeline.rs   # publisher → broker → consumer → batcher → sink
//!     ├── outages.rs    # broker, buffer and store failure domains
//!     └── http.rs       # account-api request → persisted audit row
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p audit-tests
//! cargo test -p audit-tests integration::outages::
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
