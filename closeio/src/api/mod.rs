//! HTTP surface for receiving Close webhooks.
//!
//! - **[`handlers`]**: Axum route handlers
//!
//! # Routes
//!
//! - **Webhook receiver** (`POST {webhooks.path}`, default `/webhooks/closeio`): verifies,
//!   normalizes and dispatches one delivery

pub mod handlers;
