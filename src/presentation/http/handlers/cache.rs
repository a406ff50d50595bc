//! Cache Statistics Handler

use axum::{extract::State, Json};

use crate::infrastructure::cache::CacheStats;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Usage counters of the response cache plus store-wide key count and memory
pub async fn get_cache_stats(State(state): State<AppState>) -> Result<Json<CacheStats>, AppError> {
    Ok(Json(state.cache.stats().await?))
}
