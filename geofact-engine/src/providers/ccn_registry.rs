//! CCN registry provider: highest legal authority for water/sewer service
//!
//! Queries the canonical Certificate of Convenience and Necessity table
//! seeded from the state registry. A CCN match is the strongest claim a
//! source can make about retail service territory, hence the 0.95 intrinsic
//! confidence.

use super::{Provider, ProviderError, QueryContext};
use crate::db::ccn;
use crate::types::{
    Candidate, FactType, FactValue, Identifiers, ProviderKind, ResolutionMethod, UtilityService,
};
use async_trait::async_trait;
use sqlx::SqlitePool;

const CCN_CONFIDENCE: f64 = 0.95;

pub struct CcnRegistryProvider {
    pool: SqlitePool,
}

impl CcnRegistryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn service_type(fact_type: FactType) -> Option<&'static str> {
        match fact_type {
            FactType::WaterProvider => Some("water"),
            FactType::SewerProvider => Some("sewer"),
            _ => None,
        }
    }
}

#[async_trait]
impl Provider for CcnRegistryProvider {
    fn name(&self) -> &'static str {
        "ccn_registry"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ccn
    }

    fn supports(&self, fact_type: FactType) -> bool {
        Self::service_type(fact_type).is_some()
    }

    fn eligible(&self, ctx: &QueryContext) -> bool {
        // State registry: only meaningful inside the primary coverage area
        ctx.point.is_some() && ctx.jurisdiction.in_primary
    }

    fn priority_hint(&self) -> u8 {
        10
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
    ) -> Result<Option<Candidate>, ProviderError> {
        let Some(point) = ctx.point.as_ref() else {
            return Ok(None);
        };
        let Some(service) = Self::service_type(fact_type) else {
            return Ok(None);
        };

        let areas = ccn::areas_containing(&self.pool, point, service).await?;
        tracing::debug!("CCN registry: {} {} boundaries at point", areas.len(), service);

        let Some(area) = areas.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(Candidate {
            fact_type,
            value: FactValue::Utility(UtilityService {
                provider_name: area.utility_name.clone(),
                provider_type: ProviderKind::Ccn,
                capacity_status: area.status.clone().or_else(|| Some("unknown".to_string())),
                contact_phone: area.contact_phone.clone(),
                has_water: service == "water",
                has_sewer: service == "sewer",
            }),
            provider_kind: ProviderKind::Ccn,
            identifiers: Identifiers {
                provider_id: Some(area.id),
                ccn_number: area.ccn_number,
                district_no: None,
            },
            intrinsic_confidence: CCN_CONFIDENCE,
            method: ResolutionMethod::CcnSpatialMatch,
            provider_name: "ccn_registry".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::jurisdiction::Jurisdiction;
    use geofact_common::geo::LatLng;

    fn primary_ctx(point: LatLng) -> QueryContext {
        QueryContext {
            point: Some(point),
            address: None,
            jurisdiction: Jurisdiction {
                in_primary: true,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_match_produces_ccn_candidate() {
        let pool = init_memory_pool().await.unwrap();
        ccn::insert_area(
            &pool,
            "ccn-w1",
            "Quadvest LP",
            Some("13201"),
            "water",
            (29.70, 29.80, -95.45, -95.30),
            Some("active"),
            Some("281-555-0100"),
        )
        .await
        .unwrap();

        let provider = CcnRegistryProvider::new(pool);
        let ctx = primary_ctx(LatLng::new(29.7604, -95.3698));

        let candidate = provider
            .query(&ctx, FactType::WaterProvider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.intrinsic_confidence, CCN_CONFIDENCE);
        assert_eq!(candidate.method, ResolutionMethod::CcnSpatialMatch);
        assert_eq!(candidate.identifiers.ccn_number.as_deref(), Some("13201"));
        match candidate.value {
            FactValue::Utility(u) => {
                assert_eq!(u.provider_name, "Quadvest LP");
                assert!(u.has_water);
                assert!(!u.has_sewer);
            }
            _ => panic!("expected utility value"),
        }
    }

    #[tokio::test]
    async fn test_no_match_is_none_not_error() {
        let pool = init_memory_pool().await.unwrap();
        let provider = CcnRegistryProvider::new(pool);
        let ctx = primary_ctx(LatLng::new(29.7604, -95.3698));

        assert!(provider
            .query(&ctx, FactType::WaterProvider)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_not_eligible_outside_primary() {
        let pool = init_memory_pool().await.unwrap();
        let provider = CcnRegistryProvider::new(pool);

        let ctx = QueryContext {
            point: Some(LatLng::new(30.2672, -97.7431)),
            address: None,
            jurisdiction: Jurisdiction::default(),
        };
        assert!(!provider.eligible(&ctx));
    }

    #[tokio::test]
    async fn test_storm_not_supported() {
        let pool = init_memory_pool().await.unwrap();
        let provider = CcnRegistryProvider::new(pool);
        assert!(!provider.supports(FactType::StormProvider));
        assert!(!provider.supports(FactType::AddressIdentity));
    }
}
