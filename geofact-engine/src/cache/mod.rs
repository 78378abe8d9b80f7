//! Spatial cache for resolved facts
//!
//! Answers "do we already know fact F near point P (or for normalized
//! address A), and is it still fresh?" Lookup is tolerance-based: a bucket
//! pre-filter followed by an exact haversine check, never exact-coordinate
//! equality. Entries are immutable once written and are never returned past
//! their expiry; expired entries are lazily evicted on read.
//!
//! The store is injected into the orchestrator behind `CacheStore` so tests
//! run against the in-memory implementation.

pub mod sqlite;

use crate::types::{FactType, ResolvedFact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geofact_common::geo::{normalize_address, LatLng, SpatialBucket};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub use sqlite::SqliteCacheStore;

/// Cache lookup key: approximate location or normalized address
#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
    Point(LatLng),
    Address(String),
}

impl CacheKey {
    pub fn for_address(raw: &str) -> Self {
        CacheKey::Address(normalize_address(raw))
    }
}

/// One cached resolution, owned exclusively by the cache store
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fact_type: FactType,
    pub key: CacheKey,
    pub fact: ResolvedFact,
    pub resolved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Injected cache store contract. Backend errors are surfaced so the
/// orchestrator can degrade them to cache-miss behavior.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Freshest unexpired entry within `tolerance_m` of the key (exact
    /// match for address keys)
    async fn get(
        &self,
        fact_type: FactType,
        key: &CacheKey,
        tolerance_m: f64,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Write-through store; last write wins for the same key
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;
}

/// In-memory cache store (tests and single-process deployments)
#[derive(Default)]
pub struct MemoryCacheStore {
    points: RwLock<HashMap<(FactType, SpatialBucket), Vec<CacheEntry>>>,
    addresses: RwLock<HashMap<(FactType, String), CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        fact_type: FactType,
        key: &CacheKey,
        tolerance_m: f64,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let now = Utc::now();
        match key {
            CacheKey::Address(addr) => {
                let mut map = self.addresses.write().await;
                let map_key = (fact_type, addr.clone());
                match map.get(&map_key) {
                    Some(entry) if !entry.is_expired(now) => Ok(Some(entry.clone())),
                    Some(_) => {
                        map.remove(&map_key);
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }
            CacheKey::Point(point) => {
                let mut map = self.points.write().await;
                let mut best: Option<(f64, CacheEntry)> = None;

                for bucket in point.bucket().with_neighbors() {
                    let Some(entries) = map.get_mut(&(fact_type, bucket)) else {
                        continue;
                    };
                    // Lazy eviction of expired entries in scanned buckets
                    entries.retain(|e| !e.is_expired(now));

                    for entry in entries.iter() {
                        let CacheKey::Point(stored) = &entry.key else {
                            continue;
                        };
                        let d = point.distance_meters(stored);
                        if d <= tolerance_m
                            && best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true)
                        {
                            best = Some((d, entry.clone()));
                        }
                    }
                }

                Ok(best.map(|(_, e)| e))
            }
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        match &entry.key {
            CacheKey::Address(addr) => {
                self.addresses
                    .write()
                    .await
                    .insert((entry.fact_type, addr.clone()), entry);
            }
            CacheKey::Point(point) => {
                let bucket = point.bucket();
                let mut map = self.points.write().await;
                let entries = map.entry((entry.fact_type, bucket)).or_default();
                // Same-spot rewrite replaces, other points accumulate
                entries.retain(|e| e.key != entry.key);
                entries.push(entry);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResolutionMethod;
    use chrono::Duration;

    fn entry_at(point: LatLng, ttl_secs: i64) -> CacheEntry {
        let now = Utc::now();
        let mut fact = ResolvedFact::unresolved(FactType::WaterProvider, vec![]);
        fact.method = ResolutionMethod::Cached;
        fact.confidence = 0.9;
        CacheEntry {
            fact_type: FactType::WaterProvider,
            key: CacheKey::Point(point),
            fact,
            resolved_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn test_tolerance_hit_and_miss() {
        let store = MemoryCacheStore::new();
        let stored = LatLng::new(29.7604, -95.3698);
        store.put(entry_at(stored, 3600)).await.unwrap();

        // ~50 m north: inside a 100 m tolerance
        let near = LatLng::new(29.76085, -95.3698);
        let hit = store
            .get(FactType::WaterProvider, &CacheKey::Point(near), 100.0)
            .await
            .unwrap();
        assert!(hit.is_some());

        // ~300 m north: outside
        let far = LatLng::new(29.7631, -95.3698);
        let miss = store
            .get(FactType::WaterProvider, &CacheKey::Point(far), 100.0)
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_fact_type_isolation() {
        let store = MemoryCacheStore::new();
        let point = LatLng::new(29.7604, -95.3698);
        store.put(entry_at(point, 3600)).await.unwrap();

        let other = store
            .get(FactType::SewerProvider, &CacheKey::Point(point), 100.0)
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_never_returned() {
        let store = MemoryCacheStore::new();
        let point = LatLng::new(29.7604, -95.3698);
        store.put(entry_at(point, -1)).await.unwrap();

        let result = store
            .get(FactType::WaterProvider, &CacheKey::Point(point), 100.0)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_address_key_exact_match() {
        let store = MemoryCacheStore::new();
        let now = Utc::now();
        let entry = CacheEntry {
            fact_type: FactType::AddressIdentity,
            key: CacheKey::for_address("  1600 Smith St,   Houston "),
            fact: ResolvedFact::unresolved(FactType::AddressIdentity, vec![]),
            resolved_at: now,
            expires_at: now + Duration::hours(1),
        };
        store.put(entry).await.unwrap();

        // Different whitespace and casing normalizes to the same key
        let hit = store
            .get(
                FactType::AddressIdentity,
                &CacheKey::for_address("1600 SMITH ST, HOUSTON"),
                0.0,
            )
            .await
            .unwrap();
        assert!(hit.is_some());

        let miss = store
            .get(
                FactType::AddressIdentity,
                &CacheKey::for_address("1601 Smith St, Houston"),
                0.0,
            )
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_nearest_entry_wins() {
        let store = MemoryCacheStore::new();
        let near = LatLng::new(29.76040, -95.36980);
        let farther = LatLng::new(29.76080, -95.36980);
        store.put(entry_at(farther, 3600)).await.unwrap();
        store.put(entry_at(near, 3600)).await.unwrap();

        let query = LatLng::new(29.76042, -95.36980);
        let hit = store
            .get(FactType::WaterProvider, &CacheKey::Point(query), 100.0)
            .await
            .unwrap()
            .unwrap();
        match hit.key {
            CacheKey::Point(p) => assert!((p.lat - near.lat).abs() < 1e-9),
            _ => panic!("expected point key"),
        }
    }
}
