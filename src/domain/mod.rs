//! # Domain Layer
//!
//! Campaign metric types shared by ingestion, the push gateway and the
//! client channel.
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure or presentation layers
//! - Repository traits define data access contracts

pub mod metrics;

pub use metrics::*;
