//! REST API and gateway tests

mod gateway_tests;
mod health_tests;
mod metrics_tests;
mod rate_limit_tests;
mod session_tests;
