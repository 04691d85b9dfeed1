//! # Domain Layer
//!
//! - `account` - Account entity and the patch use case

pub mod account;
