//! Provider adapters, one per authoritative or semi-authoritative source
//!
//! All adapters implement `Provider`. A provider answers with zero or one
//! `Candidate` per query and is side-effect free with respect to resolution
//! state; any caching a provider needs goes through the tiered fetcher.
//! Transport failures surface as `ProviderError` and are absorbed by the
//! resolver as "no candidate", never fatal to the overall resolution.

pub mod address_point;
pub mod ccn_registry;
pub mod district_boundary;
pub mod geocoder;
pub mod municipal;

pub use address_point::AddressPointProvider;
pub use ccn_registry::CcnRegistryProvider;
pub use district_boundary::{DistrictBoundaryProvider, DistrictKind};
pub use geocoder::GeocoderProvider;
pub use municipal::MunicipalDefaultProvider;

use crate::fetch::FetchError;
use crate::jurisdiction::Jurisdiction;
use crate::types::{Candidate, FactType, ProviderKind};
use async_trait::async_trait;
use geofact_common::geo::LatLng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Normalized query context handed to providers. Built once per request by
/// the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub point: Option<LatLng>,
    pub address: Option<String>,
    pub jurisdiction: Jurisdiction,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Capability-typed adapter over one data source
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered name, stable across runs (appears in logs, responses,
    /// and the usage accounting)
    fn name(&self) -> &'static str;

    fn kind(&self) -> ProviderKind;

    fn supports(&self, fact_type: FactType) -> bool;

    /// Jurisdiction predicate: whether this source can speak to the query
    /// at all. Checked before any network or database work.
    fn eligible(&self, ctx: &QueryContext) -> bool;

    /// Tie-break ordering within a jurisdiction; lower runs earlier
    fn priority_hint(&self) -> u8 {
        100
    }

    /// Answer for one fact type. `Ok(None)` is the ordinary "not found";
    /// errors are reserved for transport/parse failures and are treated
    /// identically to "not found" by the caller.
    async fn query(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
    ) -> Result<Option<Candidate>, ProviderError>;
}

/// Fixed, fact-type-specific provider ordering
///
/// Registration order is the priority order; `priority_hint` stably breaks
/// ties when catalogs are merged from several sources.
#[derive(Default)]
pub struct ProviderCatalog {
    by_fact: HashMap<FactType, Vec<Arc<dyn Provider>>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for every fact type it supports
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        for fact_type in FactType::ALL {
            if provider.supports(fact_type) {
                let list = self.by_fact.entry(fact_type).or_default();
                list.push(provider.clone());
                list.sort_by_key(|p| p.priority_hint());
            }
        }
    }

    /// Providers for a fact type in priority order (possibly empty)
    pub fn providers_for(&self, fact_type: FactType) -> &[Arc<dyn Provider>] {
        self.by_fact
            .get(&fact_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        name: &'static str,
        hint: u8,
    }

    #[async_trait]
    impl Provider for Stub {
        fn name(&self) -> &'static str {
            self.name
        }
        fn kind(&self) -> ProviderKind {
            ProviderKind::Unknown
        }
        fn supports(&self, fact_type: FactType) -> bool {
            fact_type == FactType::WaterProvider
        }
        fn eligible(&self, _ctx: &QueryContext) -> bool {
            true
        }
        fn priority_hint(&self) -> u8 {
            self.hint
        }
        async fn query(
            &self,
            _ctx: &QueryContext,
            _fact_type: FactType,
        ) -> Result<Option<Candidate>, ProviderError> {
            Ok(None)
        }
    }

    #[test]
    fn test_catalog_orders_by_hint() {
        let mut catalog = ProviderCatalog::new();
        catalog.register(Arc::new(Stub { name: "last", hint: 50 }));
        catalog.register(Arc::new(Stub { name: "first", hint: 10 }));
        catalog.register(Arc::new(Stub { name: "middle", hint: 30 }));

        let names: Vec<_> = catalog
            .providers_for(FactType::WaterProvider)
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["first", "middle", "last"]);
        assert!(catalog.providers_for(FactType::SewerProvider).is_empty());
    }
}
