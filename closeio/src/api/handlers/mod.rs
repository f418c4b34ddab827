//! HTTP request handlers.
//!
//! - [`webhooks`]: Close webhook delivery endpoint

pub mod webhooks;
