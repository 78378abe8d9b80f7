//! Municipal default provider: the bottom utility tier
//!
//! When no registry or district claims a point, cities known to operate
//! their own water/sewer systems are assumed to serve addresses inside
//! their limits. Storm drainage additionally falls back to county flood
//! control. These are defaults, not boundary matches, so confidence is the
//! lowest of the utility cascade.

use super::{Provider, ProviderError, QueryContext};
use crate::types::{
    Candidate, FactType, FactValue, Identifiers, ProviderKind, ResolutionMethod, UtilityService,
};
use async_trait::async_trait;

const CITY_WATER_CONFIDENCE: f64 = 0.75;
const CITY_STORM_CONFIDENCE: f64 = 0.70;
const COUNTY_STORM_CONFIDENCE: f64 = 0.60;

pub struct MunicipalDefaultProvider {
    /// Cities with their own retail service, lowercase
    cities: Vec<String>,
}

impl MunicipalDefaultProvider {
    pub fn new(cities: Vec<String>) -> Self {
        Self { cities }
    }

    fn city_serves(&self, city: &str) -> bool {
        let city = city.to_lowercase();
        self.cities.iter().any(|c| c == &city)
    }
}

fn utility_candidate(
    fact_type: FactType,
    provider_name: String,
    provider_kind: ProviderKind,
    method: ResolutionMethod,
    confidence: f64,
    capacity: &str,
) -> Candidate {
    Candidate {
        fact_type,
        value: FactValue::Utility(UtilityService {
            provider_name,
            provider_type: provider_kind,
            capacity_status: Some(capacity.to_string()),
            contact_phone: None,
            has_water: fact_type == FactType::WaterProvider,
            has_sewer: fact_type == FactType::SewerProvider,
        }),
        provider_kind,
        identifiers: Identifiers::default(),
        intrinsic_confidence: confidence,
        method,
        provider_name: "municipal_default".to_string(),
    }
}

#[async_trait]
impl Provider for MunicipalDefaultProvider {
    fn name(&self) -> &'static str {
        "municipal_default"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Municipal
    }

    fn supports(&self, fact_type: FactType) -> bool {
        matches!(
            fact_type,
            FactType::WaterProvider | FactType::SewerProvider | FactType::StormProvider
        )
    }

    fn eligible(&self, ctx: &QueryContext) -> bool {
        ctx.jurisdiction.city.is_some() || ctx.jurisdiction.county.is_some()
    }

    fn priority_hint(&self) -> u8 {
        40
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        fact_type: FactType,
    ) -> Result<Option<Candidate>, ProviderError> {
        let city = ctx.jurisdiction.city.as_deref();
        let county = ctx.jurisdiction.county.as_deref();

        let candidate = match fact_type {
            FactType::WaterProvider => city.filter(|c| self.city_serves(c)).map(|c| {
                utility_candidate(
                    fact_type,
                    format!("City of {} Water", c),
                    ProviderKind::Municipal,
                    ResolutionMethod::CityDefault,
                    CITY_WATER_CONFIDENCE,
                    "available",
                )
            }),
            FactType::SewerProvider => city.filter(|c| self.city_serves(c)).map(|c| {
                utility_candidate(
                    fact_type,
                    format!("City of {} Wastewater", c),
                    ProviderKind::Municipal,
                    ResolutionMethod::CityDefault,
                    CITY_WATER_CONFIDENCE,
                    "available",
                )
            }),
            FactType::StormProvider => match (city, county) {
                (Some(c), _) => Some(utility_candidate(
                    fact_type,
                    format!("City of {} Stormwater", c),
                    ProviderKind::Municipal,
                    ResolutionMethod::CityDefault,
                    CITY_STORM_CONFIDENCE,
                    "available",
                )),
                (None, Some(k)) => Some(utility_candidate(
                    fact_type,
                    format!("{} County Flood Control", k),
                    ProviderKind::County,
                    ResolutionMethod::CountyDefault,
                    COUNTY_STORM_CONFIDENCE,
                    "unknown",
                )),
                (None, None) => None,
            },
            FactType::AddressIdentity => None,
        };

        Ok(candidate)
    }
}
