//! Repository Implementations
//!
//! Concrete implementations of the repository traits defined in the domain
//! layer.
//!
//! ## Available Repositories
//!
//! - **InMemoryMetricsRepository** - Latest merged campaign metrics

mod metrics_repository;

pub use metrics_repository::InMemoryMetricsRepository;
