//! HTTP Handlers
//!
//! Request handlers for all HTTP endpoints.

pub mod cache;
pub mod health;
pub mod metrics;
pub mod session;
