//! geofact-engine library interface
//!
//! Exposes the resolution engine and its HTTP surface for integration
//! testing.

pub mod api;
pub mod cache;
pub mod db;
pub mod derive;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod jurisdiction;
pub mod providers;
pub mod resolver;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::engine::ResolutionEngine;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The shared resolution engine
    pub engine: Arc<ResolutionEngine>,
    /// Database connection pool (statistics queries)
    pub db: SqlitePool,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<ResolutionEngine>, db: SqlitePool) -> Self {
        Self {
            engine,
            db,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(api::resolve_routes())
        .merge(api::stats_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
