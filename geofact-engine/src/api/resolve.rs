//! Resolution endpoint
//!
//! POST /resolve accepts a point and/or address plus optional fact-type
//! filter, and returns the full resolution bundle in the standard response
//! envelope.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::engine::{Query, ResolveMeta};
use crate::error::ApiResult;
use crate::types::ResolutionBundle;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub data: ResolutionBundle,
    pub meta: ResolveMeta,
}

/// POST /resolve
pub async fn resolve(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> ApiResult<Json<ResolveResponse>> {
    let (bundle, meta) = state.engine.resolve(query).await?;
    Ok(Json(ResolveResponse {
        success: true,
        data: bundle,
        meta,
    }))
}

/// GET /resolve/fact_types: the fact types this engine can resolve
pub async fn fact_types() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": crate::types::FactType::ALL,
    }))
}

/// Build resolution routes
pub fn resolve_routes() -> Router<AppState> {
    use axum::routing::get;
    Router::new()
        .route("/resolve", post(resolve))
        .route("/resolve/fact_types", get(fact_types))
}
