//! SQLite-backed cache store
//!
//! Persists resolved facts in `resolution_cache`. Point entries are stored
//! with their coordinates and a bucket-derived key; lookup uses a bounding
//! box in SQL as the pre-filter and an exact haversine check in Rust.
//! Expired rows found during lookup are deleted in place.

use super::{CacheEntry, CacheError, CacheKey, CacheStore};
use crate::types::{FactType, ResolvedFact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geofact_common::geo::LatLng;
use sqlx::{Row, SqlitePool};

pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn key_string(key: &CacheKey) -> String {
        match key {
            CacheKey::Address(addr) => format!("a:{}", addr),
            CacheKey::Point(p) => {
                let b = p.bucket();
                format!("p:{}:{}", b.lat_milli, b.lng_milli)
            }
        }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(
        &self,
        fact_type: FactType,
        key: &CacheKey,
        tolerance_m: f64,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let now = Utc::now();

        match key {
            CacheKey::Address(_) => {
                let key_str = Self::key_string(key);
                let row = sqlx::query(
                    r#"
                    SELECT fact_json, resolved_at, expires_at
                    FROM resolution_cache
                    WHERE fact_type = ?1 AND cache_key = ?2
                    "#,
                )
                .bind(fact_type.as_str())
                .bind(&key_str)
                .fetch_optional(&self.pool)
                .await?;

                let Some(row) = row else { return Ok(None) };
                let expires = parse_ts(&row.get::<String, _>("expires_at"))?;
                if expires <= now {
                    sqlx::query(
                        "DELETE FROM resolution_cache WHERE fact_type = ?1 AND cache_key = ?2",
                    )
                    .bind(fact_type.as_str())
                    .bind(&key_str)
                    .execute(&self.pool)
                    .await?;
                    return Ok(None);
                }

                let fact = parse_fact(&row.get::<String, _>("fact_json"))?;
                Ok(Some(CacheEntry {
                    fact_type,
                    key: key.clone(),
                    fact,
                    resolved_at: parse_ts(&row.get::<String, _>("resolved_at"))?,
                    expires_at: expires,
                }))
            }
            CacheKey::Point(point) => {
                // Degrees of latitude per meter; longitude scaled at this latitude
                let dlat = tolerance_m / 111_320.0;
                let dlng = tolerance_m / (111_320.0 * point.lat.to_radians().cos().max(0.01));

                let rows = sqlx::query(
                    r#"
                    SELECT cache_key, lat, lng, fact_json, resolved_at, expires_at
                    FROM resolution_cache
                    WHERE fact_type = ?1
                      AND lat IS NOT NULL
                      AND lat BETWEEN ?2 AND ?3
                      AND lng BETWEEN ?4 AND ?5
                    "#,
                )
                .bind(fact_type.as_str())
                .bind(point.lat - dlat)
                .bind(point.lat + dlat)
                .bind(point.lng - dlng)
                .bind(point.lng + dlng)
                .fetch_all(&self.pool)
                .await?;

                let mut best: Option<(f64, CacheEntry)> = None;
                for row in rows {
                    let expires = parse_ts(&row.get::<String, _>("expires_at"))?;
                    if expires <= now {
                        let stale_key: String = row.get("cache_key");
                        sqlx::query(
                            "DELETE FROM resolution_cache WHERE fact_type = ?1 AND cache_key = ?2",
                        )
                        .bind(fact_type.as_str())
                        .bind(stale_key)
                        .execute(&self.pool)
                        .await?;
                        continue;
                    }

                    let stored = LatLng::new(row.get("lat"), row.get("lng"));
                    let d = point.distance_meters(&stored);
                    if d <= tolerance_m && best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true) {
                        let fact = parse_fact(&row.get::<String, _>("fact_json"))?;
                        best = Some((
                            d,
                            CacheEntry {
                                fact_type,
                                key: CacheKey::Point(stored),
                                fact,
                                resolved_at: parse_ts(&row.get::<String, _>("resolved_at"))?,
                                expires_at: expires,
                            },
                        ));
                    }
                }

                Ok(best.map(|(_, e)| e))
            }
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let key_str = Self::key_string(&entry.key);
        let (lat, lng) = match &entry.key {
            CacheKey::Point(p) => (Some(p.lat), Some(p.lng)),
            CacheKey::Address(_) => (None, None),
        };
        let fact_json =
            serde_json::to_string(&entry.fact).map_err(|e| CacheError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO resolution_cache
                (fact_type, cache_key, lat, lng, fact_json, resolved_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(entry.fact_type.as_str())
        .bind(&key_str)
        .bind(lat)
        .bind(lng)
        .bind(&fact_json)
        .bind(entry.resolved_at.to_rfc3339())
        .bind(entry.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::Backend(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_fact(raw: &str) -> Result<ResolvedFact, CacheError> {
    serde_json::from_str(raw).map_err(|e| CacheError::Backend(format!("bad fact json: {}", e)))
}
