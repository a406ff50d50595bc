//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **MetricsService**: Metric ingestion, fan-out and cached snapshots
//! - **TokenService**: Bearer token verification

pub mod metrics_service;
pub mod token_service;

pub use metrics_service::{IngestOutcome, MetricsError, MetricsService, MetricsServiceImpl};
pub use token_service::{AuthError, Claims, TokenService};
