//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Store connectors (Redis, in-memory) and connection lifecycle
//! - Cache and session storage
//! - Rate limiting and pub/sub fan-out
//! - Repository implementations and Prometheus metrics

pub mod cache;
pub mod connection;
pub mod metrics;
pub mod pubsub;
pub mod rate_limit;
pub mod repositories;
pub mod store;
