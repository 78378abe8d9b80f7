//! Cache and usage statistics endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub success: bool,
    pub data: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    /// Rows in the fetched-content cache
    pub fetch_cache_entries: i64,
    /// Rows in the resolved-fact cache
    pub resolution_cache_entries: i64,
    /// Total outbound fetch attempts logged
    pub fetch_attempts: i64,
    /// Logged attempts answered from the content cache
    pub fetch_cache_hits: i64,
    /// Accumulated proxy cost units across all logged fetches
    pub total_cost_units: i64,
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> ApiResult<Json<CacheStatsResponse>> {
    let fetch_cache_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_cache")
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let resolution_cache_entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM resolution_cache")
            .fetch_one(&state.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (fetch_attempts, fetch_cache_hits, total_cost_units): (i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*),
                COALESCE(SUM(cache_hit), 0),
                COALESCE(SUM(cost_units), 0)
         FROM fetch_usage_log",
    )
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(CacheStatsResponse {
        success: true,
        data: CacheStats {
            fetch_cache_entries,
            resolution_cache_entries,
            fetch_attempts,
            fetch_cache_hits,
            total_cost_units,
        },
    }))
}

/// Build statistics routes
pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/cache/stats", get(cache_stats))
}
