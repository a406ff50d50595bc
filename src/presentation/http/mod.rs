//! HTTP API
//!
//! Routes and handlers of the REST surface.

pub mod handlers;
pub mod routes;
