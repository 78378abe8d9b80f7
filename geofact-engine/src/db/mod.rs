//! SQLite persistence for the resolution engine
//!
//! One database holds the fetch content cache, the fetch usage/cost log,
//! the spatial resolution cache, and the canonical CCN service-area
//! registry. Tables are created on startup; there is no separate migration
//! step.

pub mod ccn;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool, creating tables as needed
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests and ephemeral runs
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePool::connect(":memory:").await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Content cache for the tiered fetcher, keyed by sha256 of the URL
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetch_cache (
            url_hash TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            response_body TEXT NOT NULL,
            cost_units INTEGER NOT NULL DEFAULT 0,
            fetched_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Usage and cost accounting for every outbound fetch attempt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetch_usage_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            tier TEXT NOT NULL,
            status INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            cost_units INTEGER NOT NULL,
            cache_hit INTEGER NOT NULL,
            error_message TEXT,
            logged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Spatial write-through cache of resolved facts
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolution_cache (
            fact_type TEXT NOT NULL,
            cache_key TEXT NOT NULL,
            lat REAL,
            lng REAL,
            fact_json TEXT NOT NULL,
            resolved_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (fact_type, cache_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Canonical CCN registry (seeded out of band from the state registry)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ccn_service_areas (
            id TEXT PRIMARY KEY,
            utility_name TEXT NOT NULL,
            ccn_number TEXT,
            service_type TEXT NOT NULL,
            min_lat REAL NOT NULL,
            max_lat REAL NOT NULL,
            min_lng REAL NOT NULL,
            max_lng REAL NOT NULL,
            status TEXT,
            contact_phone TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (fetch_cache, fetch_usage_log, resolution_cache, ccn_service_areas)"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_tables_idempotent() {
        let pool = init_memory_pool().await.unwrap();
        // Second run must not fail
        init_tables(&pool).await.unwrap();
    }
}
