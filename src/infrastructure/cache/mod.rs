//! Cache Module
//!
//! Cache-aside and session storage on the shared store.
//!
//! This module provides:
//! - `CacheService`, typed get/set/remember operations in a fixed `Namespace`
//! - `SessionStore`, TTL-backed session records with shallow-merge updates
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! |   SessionStore    |
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! |   CacheService    |  <-- namespaced, fail-soft reads
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! |   StoreManager    |  <-- command connection
//! +-------------------+
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use adpulse::infrastructure::cache::CacheService;
//! use adpulse::infrastructure::store::Namespace;
//!
//! let cache = CacheService::new(manager, Namespace::Cache);
//! let overview: Overview = cache
//!     .remember("overview:c1", 300, || repository.overview("c1"))
//!     .await?;
//! ```

mod cache_service;
mod session_cache;

pub use cache_service::{CacheService, CacheStats};
pub use session_cache::{SessionData, SessionStore};
