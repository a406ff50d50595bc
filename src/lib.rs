//! # AdPulse Library
//!
//! The real-time layer of a multi-tenant advertising analytics dashboard:
//! - Namespaced key-value cache with cache-aside reads
//! - Fixed and sliding window rate limiting that fails open
//! - Session store on top of the cache
//! - Pub/Sub registry multiplexing one upstream subscription per channel
//! - WebSocket push gateway and the matching reconnecting client channel
//!
//! ## Architecture
//!
//! - **Domain Layer**: Metric updates, subscription filters, repository trait
//! - **Application Layer**: Metric ingestion/snapshot services and DTOs
//! - **Infrastructure Layer**: Store connectors, cache, rate limiter, pub/sub
//! - **Presentation Layer**: HTTP handlers and WebSocket gateway
//! - **Client**: Dashboard-side realtime channel
//!
//! ## Module Structure
//!
//! ```text
//! adpulse/
//! +-- config/         Configuration management
//! +-- domain/         Metric updates and repository traits
//! +-- application/    Application services and DTOs
//! +-- infrastructure/ Store, cache, rate limiting, pub/sub
//! +-- presentation/   HTTP routes and WebSocket handlers
//! +-- client/         Realtime client channel
//! +-- shared/         Errors and the push protocol
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Realtime client channel
pub mod client;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
