//! Secondary derivations computed from the resolved facts
//!
//! Everything in here is a pure function of the fact bundle plus the cost
//! schedule. Derivations are recomputed on every call and never cached on
//! their own; a cached fact re-derives them identically.

use crate::types::{
    Candidate, Derivations, EstimatedCosts, FactType, ProviderKind, ResolvedFact, Serviceability,
    SpecialDistrict, UtilityService,
};
use geofact_common::config::CostSchedule;
use std::collections::BTreeMap;

pub struct Derivator {
    costs: CostSchedule,
}

impl Derivator {
    pub fn new(costs: CostSchedule) -> Self {
        Self { costs }
    }

    pub fn derive(
        &self,
        facts: &BTreeMap<FactType, ResolvedFact>,
        all_candidates: &[Candidate],
    ) -> Derivations {
        let water = utility_of(facts, FactType::WaterProvider);
        let sewer = utility_of(facts, FactType::SewerProvider);

        Derivations {
            estimated_costs: self.estimated_costs(water, sewer),
            serviceability: serviceability(water, sewer),
            special_districts: special_districts(facts, all_candidates),
            kill_factors: kill_factors(water, sewer),
        }
    }

    /// Area-default tap and impact fees keyed on the provider's
    /// classification. District impact fees cover water and sewer jointly,
    /// so each resolved service contributes half.
    fn estimated_costs(
        &self,
        water: Option<&UtilityService>,
        sewer: Option<&UtilityService>,
    ) -> EstimatedCosts {
        let c = &self.costs;

        let water_tap = water.map(|u| match u.provider_type {
            ProviderKind::Mud => c.mud_water_tap,
            ProviderKind::Wcid => c.wcid_water_tap,
            _ => c.municipal_water_tap,
        });
        let sewer_tap = sewer.map(|u| match u.provider_type {
            ProviderKind::Mud => c.mud_sewer_tap,
            ProviderKind::Wcid => c.wcid_sewer_tap,
            _ => c.municipal_sewer_tap,
        });

        let impact = |u: &UtilityService| match u.provider_type {
            ProviderKind::Mud => c.mud_impact_fee / 2.0,
            ProviderKind::Wcid => c.wcid_impact_fee / 2.0,
            _ => 0.0,
        };
        let impact_total = water.map(impact).unwrap_or(0.0) + sewer.map(impact).unwrap_or(0.0);
        let impact_fees = (impact_total > 0.0).then_some(impact_total);

        let total = match (water_tap, sewer_tap, impact_fees) {
            (None, None, None) => None,
            (w, s, i) => Some(w.unwrap_or(0.0) + s.unwrap_or(0.0) + i.unwrap_or(0.0)),
        };

        EstimatedCosts {
            water_tap,
            sewer_tap,
            impact_fees,
            total,
        }
    }
}

fn utility_of(
    facts: &BTreeMap<FactType, ResolvedFact>,
    fact_type: FactType,
) -> Option<&UtilityService> {
    facts
        .get(&fact_type)
        .and_then(|f| f.candidate.as_ref())
        .and_then(|c| match &c.value {
            crate::types::FactValue::Utility(u) => Some(u),
            crate::types::FactValue::Address(_) => None,
        })
}

fn serviceability(
    water: Option<&UtilityService>,
    sewer: Option<&UtilityService>,
) -> Serviceability {
    Serviceability {
        water: if water.map(|u| u.has_water).unwrap_or(false) {
            "available".to_string()
        } else {
            "unavailable".to_string()
        },
        sewer: if sewer.map(|u| u.has_sewer).unwrap_or(false) {
            "gravity_available".to_string()
        } else {
            "septic_required".to_string()
        },
    }
}

/// Deal-breaker flags for downstream consumers
fn kill_factors(water: Option<&UtilityService>, sewer: Option<&UtilityService>) -> Vec<String> {
    let mut factors = Vec::new();
    match water {
        None => factors.push("NO_WATER_PROVIDER".to_string()),
        Some(u) if u.capacity_status.as_deref() == Some("moratorium") => {
            factors.push("WATER_CAPACITY_MORATORIUM".to_string())
        }
        Some(_) => {}
    }
    match sewer {
        None => factors.push("NO_SEWER_PROVIDER".to_string()),
        Some(u) if u.capacity_status.as_deref() == Some("moratorium") => {
            factors.push("SEWER_CAPACITY_MORATORIUM".to_string())
        }
        Some(_) => {}
    }
    factors
}

/// Every distinct special-purpose district seen during resolution, whether
/// or not its candidate was the accepted one
fn special_districts(
    facts: &BTreeMap<FactType, ResolvedFact>,
    all_candidates: &[Candidate],
) -> Vec<SpecialDistrict> {
    let accepted = facts.values().filter_map(|f| f.candidate.as_ref());
    let mut districts: Vec<SpecialDistrict> = Vec::new();

    for candidate in accepted.chain(all_candidates.iter()) {
        if !matches!(
            candidate.provider_kind,
            ProviderKind::Mud | ProviderKind::Wcid
        ) {
            continue;
        }
        let name = candidate.value.display_name().to_string();
        if name.is_empty() {
            continue;
        }
        let district_no = candidate.identifiers.district_no.clone();
        let duplicate = districts.iter().any(|d| {
            d.district_type == candidate.provider_kind
                && (d.name == name || (d.district_no.is_some() && d.district_no == district_no))
        });
        if !duplicate {
            districts.push(SpecialDistrict {
                district_type: candidate.provider_kind,
                name,
                district_no,
            });
        }
    }
    districts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FactValue, Identifiers, ResolutionMethod};

    fn utility_fact(
        fact_type: FactType,
        kind: ProviderKind,
        name: &str,
        capacity: Option<&str>,
        has_water: bool,
        has_sewer: bool,
    ) -> ResolvedFact {
        ResolvedFact {
            fact_type,
            candidate: Some(Candidate {
                fact_type,
                value: FactValue::Utility(UtilityService {
                    provider_name: name.to_string(),
                    provider_type: kind,
                    capacity_status: capacity.map(String::from),
                    contact_phone: None,
                    has_water,
                    has_sewer,
                }),
                provider_kind: kind,
                identifiers: Identifiers::default(),
                intrinsic_confidence: 0.9,
                method: ResolutionMethod::MudOverlay,
                provider_name: "test".to_string(),
            }),
            method: ResolutionMethod::MudOverlay,
            confidence: 0.9,
            cached: false,
            providers_tried: vec![],
        }
    }

    fn derivator() -> Derivator {
        Derivator::new(CostSchedule::default())
    }

    #[test]
    fn test_mud_costs_include_half_impact_per_service() {
        let mut facts = BTreeMap::new();
        facts.insert(
            FactType::WaterProvider,
            utility_fact(
                FactType::WaterProvider,
                ProviderKind::Mud,
                "Harris County MUD #368",
                None,
                true,
                true,
            ),
        );
        facts.insert(
            FactType::SewerProvider,
            utility_fact(
                FactType::SewerProvider,
                ProviderKind::Mud,
                "Harris County MUD #368",
                None,
                true,
                true,
            ),
        );

        let d = derivator().derive(&facts, &[]);
        assert_eq!(d.estimated_costs.water_tap, Some(3000.0));
        assert_eq!(d.estimated_costs.sewer_tap, Some(4000.0));
        // Both services resolved to the district: full impact fee
        assert_eq!(d.estimated_costs.impact_fees, Some(8000.0));
        assert_eq!(d.estimated_costs.total, Some(15000.0));
    }

    #[test]
    fn test_municipal_costs_have_no_impact_fee() {
        let mut facts = BTreeMap::new();
        facts.insert(
            FactType::WaterProvider,
            utility_fact(
                FactType::WaterProvider,
                ProviderKind::Municipal,
                "City of Houston Water",
                None,
                true,
                false,
            ),
        );

        let d = derivator().derive(&facts, &[]);
        assert_eq!(d.estimated_costs.water_tap, Some(2500.0));
        assert_eq!(d.estimated_costs.sewer_tap, None);
        assert_eq!(d.estimated_costs.impact_fees, None);
        assert_eq!(d.estimated_costs.total, Some(2500.0));
    }

    #[test]
    fn test_nothing_resolved_yields_empty_costs_and_kill_factors() {
        let mut facts = BTreeMap::new();
        facts.insert(
            FactType::WaterProvider,
            ResolvedFact::unresolved(FactType::WaterProvider, vec![]),
        );
        facts.insert(
            FactType::SewerProvider,
            ResolvedFact::unresolved(FactType::SewerProvider, vec![]),
        );

        let d = derivator().derive(&facts, &[]);
        assert_eq!(d.estimated_costs.total, None);
        assert_eq!(d.serviceability.water, "unavailable");
        assert_eq!(d.serviceability.sewer, "septic_required");
        assert_eq!(
            d.kill_factors,
            vec!["NO_WATER_PROVIDER", "NO_SEWER_PROVIDER"]
        );
    }

    #[test]
    fn test_moratorium_becomes_kill_factor() {
        let mut facts = BTreeMap::new();
        facts.insert(
            FactType::WaterProvider,
            utility_fact(
                FactType::WaterProvider,
                ProviderKind::Mud,
                "Harris County MUD #5",
                Some("moratorium"),
                true,
                true,
            ),
        );
        facts.insert(
            FactType::SewerProvider,
            utility_fact(
                FactType::SewerProvider,
                ProviderKind::Mud,
                "Harris County MUD #5",
                None,
                true,
                true,
            ),
        );

        let d = derivator().derive(&facts, &[]);
        assert_eq!(d.kill_factors, vec!["WATER_CAPACITY_MORATORIUM"]);
        // Moratorium does not change serviceability flags
        assert_eq!(d.serviceability.water, "available");
    }

    #[test]
    fn test_special_districts_deduplicated() {
        let mut facts = BTreeMap::new();
        let fact = utility_fact(
            FactType::WaterProvider,
            ProviderKind::Mud,
            "Harris County MUD #368",
            None,
            true,
            true,
        );
        let dup = fact.candidate.clone().unwrap();
        facts.insert(FactType::WaterProvider, fact);

        let d = derivator().derive(&facts, &[dup]);
        assert_eq!(d.special_districts.len(), 1);
        assert_eq!(d.special_districts[0].district_type, ProviderKind::Mud);
        assert_eq!(d.special_districts[0].name, "Harris County MUD #368");
    }

    #[test]
    fn test_sewer_only_resolution() {
        let mut facts = BTreeMap::new();
        facts.insert(
            FactType::SewerProvider,
            utility_fact(
                FactType::SewerProvider,
                ProviderKind::Wcid,
                "Harris County WCID #50",
                None,
                false,
                true,
            ),
        );

        let d = derivator().derive(&facts, &[]);
        assert_eq!(d.serviceability.water, "unavailable");
        assert_eq!(d.serviceability.sewer, "gravity_available");
        assert_eq!(d.estimated_costs.sewer_tap, Some(3800.0));
        assert_eq!(d.estimated_costs.impact_fees, Some(3750.0));
        assert_eq!(d.kill_factors, vec!["NO_WATER_PROVIDER"]);
    }
}
