//! Integration Tests Entry Point
//!
//! Tests are organized by module:
//! - `api/` - REST API and push gateway tests
//! - `common/` - Shared test utilities

mod api;
mod common;

pub use common::*;
