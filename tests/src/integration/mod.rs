//! Cross-crate integration flows.

pub mod http;
pub mod outages;
pub mod pipeline;
