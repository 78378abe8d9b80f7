//! HTTP API handlers for geofact-engine

pub mod health;
pub mod resolve;
pub mod stats;

pub use health::health_routes;
pub use resolve::resolve_routes;
pub use stats::stats_routes;
