//! Resolution orchestrator
//!
//! Owns the full request lifecycle: validate and normalize the query,
//! establish jurisdiction, consult the spatial cache, run the priority
//! cascade per fact type, aggregate confidence, detect conflicts, compute
//! derivations, and write results back through the cache. One engine
//! instance is shared across all HTTP requests.

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::derive::Derivator;
use crate::jurisdiction::JurisdictionTable;
use crate::providers::{ProviderCatalog, QueryContext};
use crate::resolver::{fact_slot, ConfidenceAggregator, ConflictDetector, PriorityResolver};
use crate::types::{
    Candidate, ConflictRecord, FactType, FactValue, ResolutionBundle, ResolutionMethod,
    ResolvedFact,
};
use chrono::Utc;
use geofact_common::config::TomlConfig;
use geofact_common::geo::LatLng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One resolution request as received on the wire
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Query {
    pub point: Option<LatLng>,
    pub address: Option<String>,
    /// Empty means all fact types
    #[serde(default)]
    pub fact_types: Vec<FactType>,
    /// Bypass cache reads; results are still written back
    #[serde(default)]
    pub skip_cache: bool,
    #[serde(default)]
    pub jurisdiction_hints: JurisdictionHints,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JurisdictionHints {
    pub city: Option<String>,
    pub county: Option<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Per-request bookkeeping returned alongside the bundle
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolveMeta {
    pub trace_id: String,
    pub duration_ms: u64,
    /// Names of the providers contacted during this request, in invocation
    /// order; cache-served facts contribute nothing
    pub providers_queried: Vec<String>,
}

pub struct ResolutionEngine {
    resolver: PriorityResolver,
    cache: Arc<dyn CacheStore>,
    conflicts: ConflictDetector,
    derivator: Derivator,
    aggregator: ConfidenceAggregator,
    jurisdictions: JurisdictionTable,
    config: TomlConfig,
}

impl ResolutionEngine {
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        cache: Arc<dyn CacheStore>,
        config: TomlConfig,
    ) -> Self {
        let r = &config.resolution;
        Self {
            resolver: PriorityResolver::new(catalog, r),
            cache,
            conflicts: ConflictDetector::new(r.name_similarity_threshold),
            derivator: Derivator::new(config.costs.clone()),
            aggregator: ConfidenceAggregator::new(r.tier_decay),
            jurisdictions: JurisdictionTable::new(config.jurisdictions.clone()),
            config,
        }
    }

    /// Resolve one query end to end
    pub async fn resolve(
        &self,
        query: Query,
    ) -> Result<(ResolutionBundle, ResolveMeta), EngineError> {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string()[..8].to_string();

        self.validate(&query)?;

        let requested: Vec<FactType> = if query.fact_types.is_empty() {
            FactType::ALL.to_vec()
        } else {
            let mut seen = Vec::new();
            for ft in &query.fact_types {
                if !seen.contains(ft) {
                    seen.push(*ft);
                }
            }
            seen
        };

        // Wall-clock budget for the whole request; facts that miss the
        // deadline come back unresolved rather than failing the request
        let deadline = CancellationToken::new();
        {
            let deadline = deadline.clone();
            let budget = Duration::from_secs(self.config.resolution.query_timeout_secs);
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                deadline.cancel();
            });
        }

        let mut point = query.point;
        let mut city_hint = query.jurisdiction_hints.city.clone();
        let mut county_hint = query.jurisdiction_hints.county.clone();

        // An address-only query resolves the address identity up front so
        // utility facts get a point and jurisdiction labels to work with.
        // This goes through the same cache-aware path as any other fact and
        // the outcome is reused below, so the geocoder runs at most once
        // per request and a repeat query is served from cache.
        let mut address_outcome: Option<FactOutcome> = None;
        if point.is_none() {
            let address_ctx = QueryContext {
                point: None,
                address: query.address.clone(),
                jurisdiction: self.jurisdictions.locate_with_hints(
                    None,
                    city_hint.as_deref(),
                    county_hint.as_deref(),
                ),
            };
            let outcome = tokio::select! {
                outcome = self.resolve_fact(&address_ctx, FactType::AddressIdentity, &query, &trace_id) => outcome,
                _ = deadline.cancelled() => {
                    warn!("[{}] {} timed out", trace_id, FactType::AddressIdentity);
                    FactOutcome {
                        fact: ResolvedFact::unresolved(FactType::AddressIdentity, vec![]),
                        candidates: vec![],
                        from_cache: false,
                    }
                }
            };
            if let Some(candidate) = outcome.fact.candidate.as_ref() {
                if let FactValue::Address(identity) = &candidate.value {
                    debug!(
                        "[{}] address normalized to {:?} via {}",
                        trace_id, identity.point, candidate.provider_name
                    );
                    point = Some(identity.point);
                    if city_hint.is_none() {
                        city_hint = identity.components.city.clone();
                    }
                    if county_hint.is_none() {
                        county_hint = identity.components.county.clone();
                    }
                }
            }
            address_outcome = Some(outcome);
        }

        let ctx = QueryContext {
            point,
            address: query.address.clone(),
            jurisdiction: self.jurisdictions.locate_with_hints(
                point.as_ref(),
                city_hint.as_deref(),
                county_hint.as_deref(),
            ),
        };
        info!(
            "[{}] resolving {:?} at {:?} (city={:?}, primary={})",
            trace_id, requested, ctx.point, ctx.jurisdiction.city, ctx.jurisdiction.in_primary
        );

        let pending: Vec<FactType> = requested
            .iter()
            .copied()
            .filter(|&ft| !(address_outcome.is_some() && ft == FactType::AddressIdentity))
            .collect();

        let passes = futures::future::join_all(pending.iter().map(|&fact_type| {
            let ctx = &ctx;
            let query = &query;
            let deadline = deadline.clone();
            let trace_id = &trace_id;
            async move {
                tokio::select! {
                    outcome = self.resolve_fact(ctx, fact_type, query, trace_id) => outcome,
                    _ = deadline.cancelled() => {
                        warn!("[{}] {} timed out", trace_id, fact_type);
                        FactOutcome {
                            fact: ResolvedFact::unresolved(fact_type, vec![]),
                            candidates: vec![],
                            from_cache: false,
                        }
                    }
                }
            }
        }))
        .await;

        let mut facts = BTreeMap::new();
        let mut conflicts: Vec<ConflictRecord> = Vec::new();
        let mut all_candidates: Vec<Candidate> = Vec::new();
        let mut providers_queried: Vec<String> = Vec::new();
        let mut all_cached = true;

        // The up-front address outcome feeds the same bookkeeping as the
        // concurrent passes, but only lands in the bundle when the caller
        // asked for it
        let address_requested = requested.contains(&FactType::AddressIdentity);
        let outcomes = address_outcome
            .into_iter()
            .map(|outcome| (outcome, address_requested))
            .chain(passes.into_iter().map(|outcome| (outcome, true)));

        for (outcome, wanted) in outcomes {
            let fact_type = outcome.fact.fact_type;
            if !outcome.from_cache {
                for name in &outcome.fact.providers_tried {
                    if !providers_queried.contains(name) {
                        providers_queried.push(name.clone());
                    }
                }
            }
            all_cached &= outcome.from_cache;

            if self.cross_check_enabled(fact_type) {
                if let Some(record) = self.conflicts.detect(fact_type, &outcome.candidates) {
                    conflicts.push(record);
                }
            }
            all_candidates.extend(outcome.candidates);

            if !outcome.from_cache {
                self.write_back(&outcome.fact, &ctx, &query, &trace_id);
            }
            if wanted {
                facts.insert(fact_type, outcome.fact);
            }
        }

        let confidence = self.aggregator.overall(facts.values());
        let derivations = self.derivator.derive(&facts, &all_candidates);

        let bundle = ResolutionBundle {
            facts,
            confidence,
            conflicts,
            derivations,
            cached: all_cached,
        };

        let meta = ResolveMeta {
            trace_id: trace_id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            providers_queried,
        };
        info!(
            "[{}] done in {}ms: confidence {:.2}, {} conflict(s), cached={}",
            trace_id,
            meta.duration_ms,
            bundle.confidence,
            bundle.conflicts.len(),
            bundle.cached
        );
        Ok((bundle, meta))
    }

    fn validate(&self, query: &Query) -> Result<(), EngineError> {
        let has_address = query
            .address
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false);
        if query.point.is_none() && !has_address {
            return Err(EngineError::InvalidQuery(
                "either point or address is required".to_string(),
            ));
        }
        if let Some(point) = &query.point {
            if !point.is_valid() {
                return Err(EngineError::InvalidQuery(format!(
                    "coordinates out of range: {}, {}",
                    point.lat, point.lng
                )));
            }
        }
        Ok(())
    }

    async fn resolve_fact(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
        query: &Query,
        trace_id: &str,
    ) -> FactOutcome {
        if !query.skip_cache {
            if let Some(entry) = self.cache_lookup(ctx, fact_type, query).await {
                debug!("[{}] {} served from cache", trace_id, fact_type);
                let mut fact = entry.fact;
                fact.cached = true;
                fact.method = ResolutionMethod::Cached;
                return FactOutcome {
                    fact,
                    candidates: vec![],
                    from_cache: true,
                };
            }
        }

        let pass = if self.cross_check_enabled(fact_type) {
            self.resolver.cross_check(ctx, fact_type).await
        } else {
            self.resolver.resolve(ctx, fact_type).await
        };

        FactOutcome {
            fact: pass.fact,
            candidates: pass.candidates,
            from_cache: false,
        }
    }

    async fn cache_lookup(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
        query: &Query,
    ) -> Option<CacheEntry> {
        if self.ttl_for(fact_type).is_zero() {
            return None;
        }
        let key = self.cache_key(ctx, fact_type, query)?;
        let tolerance = self.config.resolution.spatial_tolerance_meters;
        match self.cache.get(fact_type, &key, tolerance).await {
            Ok(hit) => hit,
            Err(e) => {
                // Backend trouble degrades to a cache miss
                warn!("cache lookup failed for {}: {}", fact_type, e);
                None
            }
        }
    }

    fn cache_key(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
        query: &Query,
    ) -> Option<CacheKey> {
        match fact_type {
            // Address identity is keyed on the raw query address so that a
            // repeat lookup hits before any geocoding happens
            FactType::AddressIdentity => query
                .address
                .as_deref()
                .map(CacheKey::for_address)
                .or(ctx.point.map(CacheKey::Point)),
            _ => ctx
                .point
                .map(CacheKey::Point)
                .or_else(|| query.address.as_deref().map(CacheKey::for_address)),
        }
    }

    /// Fire-and-forget write-through; a failed write only costs a future
    /// cache miss
    fn write_back(&self, fact: &ResolvedFact, ctx: &QueryContext, query: &Query, trace_id: &str) {
        if !fact.is_resolved() && !self.config.resolution.cache_negative {
            return;
        }
        let ttl = self.ttl_for(fact.fact_type);
        if ttl.is_zero() {
            return;
        }
        let Some(key) = self.cache_key(ctx, fact.fact_type, query) else {
            return;
        };

        let now = Utc::now();
        let entry = CacheEntry {
            fact_type: fact.fact_type,
            key,
            fact: fact.clone(),
            resolved_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        };
        let cache = self.cache.clone();
        let trace_id = trace_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.put(entry).await {
                warn!("[{}] cache write failed: {}", trace_id, e);
            }
        });
    }

    fn cross_check_enabled(&self, fact_type: FactType) -> bool {
        let switches = &self.config.resolution.cross_check;
        match fact_type {
            FactType::WaterProvider => switches.water,
            FactType::SewerProvider => switches.sewer,
            FactType::StormProvider => switches.storm,
            FactType::AddressIdentity => switches.address,
        }
    }

    fn ttl_for(&self, fact_type: FactType) -> Duration {
        let days = fact_slot(&self.config.resolution.ttl_days, fact_type);
        if days <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(days * 86_400.0)
        }
    }
}

struct FactOutcome {
    fact: ResolvedFact,
    candidates: Vec<Candidate>,
    from_cache: bool,
}

/// Wire up the production engine: tiered fetcher, all provider adapters in
/// priority order, and the SQLite-backed spatial cache
pub fn build_engine(config: TomlConfig, pool: sqlx::SqlitePool) -> ResolutionEngine {
    use crate::cache::SqliteCacheStore;
    use crate::fetch::TieredFetcher;
    use crate::providers::{
        AddressPointProvider, CcnRegistryProvider, DistrictBoundaryProvider, DistrictKind,
        GeocoderProvider, MunicipalDefaultProvider,
    };

    let fetcher = Arc::new(TieredFetcher::new(pool.clone(), config.fetch.clone()));

    let mut catalog = ProviderCatalog::new();
    catalog.register(Arc::new(CcnRegistryProvider::new(pool.clone())));
    catalog.register(Arc::new(DistrictBoundaryProvider::new(
        fetcher.clone(),
        config.providers.mud_endpoint.clone(),
        DistrictKind::Mud,
    )));
    catalog.register(Arc::new(DistrictBoundaryProvider::new(
        fetcher.clone(),
        config.providers.wcid_endpoint.clone(),
        DistrictKind::Wcid,
    )));
    catalog.register(Arc::new(MunicipalDefaultProvider::new(
        config.providers.municipal_service_cities.clone(),
    )));
    catalog.register(Arc::new(AddressPointProvider::new(
        fetcher.clone(),
        config.providers.address_point_endpoint.clone(),
    )));
    catalog.register(Arc::new(GeocoderProvider::new(
        config.providers.geocoder_endpoint.clone(),
        config.providers.geocoder_api_key.clone(),
    )));

    let cache = Arc::new(SqliteCacheStore::new(pool));
    ResolutionEngine::new(Arc::new(catalog), cache, config)
}
