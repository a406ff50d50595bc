//! Application Layer
//!
//! Metric ingestion and snapshot services, bearer token verification and
//! the request/response bodies of the HTTP API.

pub mod dto;
pub mod services;
