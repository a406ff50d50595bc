//! Data Transfer Objects
//!
//! DTOs for API request/response serialization.

pub mod request;
pub mod response;

pub use request::{
    CreateSessionRequest, IngestMetricsRequest, RefreshSessionQuery, SnapshotQuery,
    UpdateSessionRequest,
};
pub use response::{IngestResponse, SessionResponse, SnapshotResponse};
