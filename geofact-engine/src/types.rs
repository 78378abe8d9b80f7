//! Shared types and data contracts for the resolution engine
//!
//! These are the explicit contracts between the engine's layers: providers
//! produce `Candidate`s, the priority resolver turns them into
//! `ResolvedFact`s, the orchestrator assembles the response bundle. All of
//! them are immutable once produced.

use geofact_common::geo::LatLng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of information being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    WaterProvider,
    SewerProvider,
    StormProvider,
    AddressIdentity,
}

impl FactType {
    pub const ALL: [FactType; 4] = [
        FactType::WaterProvider,
        FactType::SewerProvider,
        FactType::StormProvider,
        FactType::AddressIdentity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::WaterProvider => "water_provider",
            FactType::SewerProvider => "sewer_provider",
            FactType::StormProvider => "storm_provider",
            FactType::AddressIdentity => "address_identity",
        }
    }
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of the authority behind a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Certificate of Convenience and Necessity holder (state registry)
    Ccn,
    /// Municipal Utility District
    Mud,
    /// Water Control and Improvement District
    Wcid,
    Municipal,
    County,
    AddressPoint,
    Geocoder,
    Private,
    Unknown,
}

/// How a fact was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    CcnSpatialMatch,
    MudOverlay,
    WcidOverlay,
    CityDefault,
    CountyDefault,
    AddressPointMatch,
    GeocoderMatch,
    Cached,
    Unresolved,
}

/// Source-specific identifiers carried on a candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identifiers {
    pub provider_id: Option<String>,
    pub ccn_number: Option<String>,
    pub district_no: Option<String>,
}

impl Identifiers {
    /// True when both sides carry at least one identifier and every
    /// identifier present on both sides matches.
    pub fn agrees_with(&self, other: &Identifiers) -> Option<bool> {
        let mut compared = false;
        for (a, b) in [
            (&self.provider_id, &other.provider_id),
            (&self.ccn_number, &other.ccn_number),
            (&self.district_no, &other.district_no),
        ] {
            if let (Some(a), Some(b)) = (a, b) {
                compared = true;
                if a != b {
                    return Some(false);
                }
            }
        }
        compared.then_some(true)
    }
}

/// Utility-service answer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityService {
    pub provider_name: String,
    pub provider_type: ProviderKind,
    /// "available", "unknown", or "moratorium"
    pub capacity_status: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub has_water: bool,
    #[serde(default)]
    pub has_sewer: bool,
}

/// Validated-address answer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressIdentity {
    pub standardized_address: Option<String>,
    pub point: LatLng,
    #[serde(default)]
    pub components: AddressComponents,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressComponents {
    pub street_number: Option<String>,
    pub street_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub county: Option<String>,
}

/// The typed value a provider answered with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactValue {
    Utility(UtilityService),
    Address(AddressIdentity),
}

impl FactValue {
    pub fn display_name(&self) -> &str {
        match self {
            FactValue::Utility(u) => &u.provider_name,
            FactValue::Address(a) => a.standardized_address.as_deref().unwrap_or(""),
        }
    }
}

/// A single provider's answer for one fact type. Never mutated after the
/// provider returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub fact_type: FactType,
    pub value: FactValue,
    pub provider_kind: ProviderKind,
    #[serde(default)]
    pub identifiers: Identifiers,
    /// Source-intrinsic confidence in [0,1], before any fallback decay
    pub intrinsic_confidence: f64,
    pub method: ResolutionMethod,
    /// Registered name of the provider that produced this
    pub provider_name: String,
}

/// The resolver's decision for one fact type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedFact {
    pub fact_type: FactType,
    /// None means the fact resolved to "unresolved" (a legitimate terminal
    /// state, not an error)
    pub candidate: Option<Candidate>,
    pub method: ResolutionMethod,
    /// Final confidence after tier decay, in [0,1]; 0 when unresolved
    pub confidence: f64,
    pub cached: bool,
    /// Providers invoked during this pass, in order
    #[serde(default)]
    pub providers_tried: Vec<String>,
}

impl ResolvedFact {
    pub fn unresolved(fact_type: FactType, providers_tried: Vec<String>) -> Self {
        Self {
            fact_type,
            candidate: None,
            method: ResolutionMethod::Unresolved,
            confidence: 0.0,
            cached: false,
            providers_tried,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.candidate.is_some()
    }
}

/// Two or more consulted providers disagreed on the same fact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub fact_type: FactType,
    pub competing: Vec<Candidate>,
    pub detail: String,
}

/// Serviceability verdict per service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Serviceability {
    /// "available" | "unavailable"
    pub water: String,
    /// "gravity_available" | "septic_required"
    pub sewer: String,
}

/// Special-purpose district encountered while resolving
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialDistrict {
    pub district_type: ProviderKind,
    pub name: String,
    pub district_no: Option<String>,
}

/// Estimated connection costs in dollars
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatedCosts {
    pub water_tap: Option<f64>,
    pub sewer_tap: Option<f64>,
    pub impact_fees: Option<f64>,
    pub total: Option<f64>,
}

/// Outputs computed purely from the resolved facts; recomputed per call,
/// never cached independently of its inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Derivations {
    pub estimated_costs: EstimatedCosts,
    pub serviceability: Serviceability,
    pub special_districts: Vec<SpecialDistrict>,
    pub kill_factors: Vec<String>,
}

/// Full resolution bundle returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionBundle {
    pub facts: BTreeMap<FactType, ResolvedFact>,
    /// Mean of the non-null per-fact confidences; 0 when nothing resolved
    pub confidence: f64,
    pub conflicts: Vec<ConflictRecord>,
    pub derivations: Derivations,
    /// True when every requested fact came from cache
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&FactType::WaterProvider).unwrap(),
            "\"water_provider\""
        );
        assert_eq!(
            serde_json::from_str::<FactType>("\"storm_provider\"").unwrap(),
            FactType::StormProvider
        );
    }

    #[test]
    fn test_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&ResolutionMethod::MudOverlay).unwrap(),
            "\"mud_overlay\""
        );
        assert_eq!(
            serde_json::to_string(&ResolutionMethod::CcnSpatialMatch).unwrap(),
            "\"ccn_spatial_match\""
        );
    }

    #[test]
    fn test_identifier_agreement() {
        let a = Identifiers {
            ccn_number: Some("12345".into()),
            ..Default::default()
        };
        let b = Identifiers {
            ccn_number: Some("12345".into()),
            district_no: Some("88".into()),
            ..Default::default()
        };
        let c = Identifiers {
            ccn_number: Some("99999".into()),
            ..Default::default()
        };
        let none = Identifiers::default();

        assert_eq!(a.agrees_with(&b), Some(true));
        assert_eq!(a.agrees_with(&c), Some(false));
        // Nothing to compare
        assert_eq!(a.agrees_with(&none), None);
    }

    #[test]
    fn test_unresolved_fact_shape() {
        let fact = ResolvedFact::unresolved(FactType::WaterProvider, vec!["ccn_registry".into()]);
        assert!(!fact.is_resolved());
        assert_eq!(fact.confidence, 0.0);
        assert_eq!(fact.method, ResolutionMethod::Unresolved);
    }
}
