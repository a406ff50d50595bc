//! Presentation Layer
//!
//! HTTP routes, middleware and the websocket push gateway.

pub mod http;
pub mod middleware;
pub mod websocket;
