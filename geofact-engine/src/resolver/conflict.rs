//! Conflict detection across cross-checked candidates
//!
//! Only runs on cross-check passes, where every eligible provider answered
//! independently. Two candidates conflict when their structured identifiers
//! disagree outright, or when identifiers are inconclusive and the provider
//! names are textually dissimilar. At most one conflict record is emitted
//! per fact type.

use crate::types::{Candidate, ConflictRecord, FactType, FactValue};
use strsim::normalized_levenshtein;

pub struct ConflictDetector {
    name_similarity_threshold: f64,
}

impl ConflictDetector {
    pub fn new(name_similarity_threshold: f64) -> Self {
        Self {
            name_similarity_threshold,
        }
    }

    /// Compare all candidate pairs for one fact type; returns at most one
    /// record naming every candidate that disagreed with another
    pub fn detect(&self, fact_type: FactType, candidates: &[Candidate]) -> Option<ConflictRecord> {
        if candidates.len() < 2 {
            return None;
        }

        let mut disputed = vec![false; candidates.len()];
        let mut detail = None;

        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if self.disagree(&candidates[i], &candidates[j]) {
                    disputed[i] = true;
                    disputed[j] = true;
                    if detail.is_none() {
                        detail = Some(format!(
                            "{} reports \"{}\" but {} reports \"{}\"",
                            candidates[i].provider_name,
                            candidates[i].value.display_name(),
                            candidates[j].provider_name,
                            candidates[j].value.display_name(),
                        ));
                    }
                }
            }
        }

        let detail = detail?;
        let competing = candidates
            .iter()
            .zip(disputed)
            .filter(|(_, d)| *d)
            .map(|(c, _)| c.clone())
            .collect();

        Some(ConflictRecord {
            fact_type,
            competing,
            detail,
        })
    }

    fn disagree(&self, a: &Candidate, b: &Candidate) -> bool {
        // Structured identifiers are authoritative when both sides carry
        // a comparable one
        match a.identifiers.agrees_with(&b.identifiers) {
            Some(agree) => !agree,
            None => {
                // A mud-vs-municipal classification split is a disagreement
                // even before looking at names
                if let (FactValue::Utility(ua), FactValue::Utility(ub)) = (&a.value, &b.value) {
                    if ua.provider_type != ub.provider_type {
                        return true;
                    }
                }
                let left = a.value.display_name().to_lowercase();
                let right = b.value.display_name().to_lowercase();
                if left.is_empty() || right.is_empty() {
                    return false;
                }
                normalized_levenshtein(&left, &right) < self.name_similarity_threshold
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FactValue, Identifiers, ProviderKind, ResolutionMethod, UtilityService,
    };

    fn typed_candidate(
        provider: &str,
        name: &str,
        kind: ProviderKind,
        ids: Identifiers,
    ) -> Candidate {
        Candidate {
            fact_type: FactType::WaterProvider,
            value: FactValue::Utility(UtilityService {
                provider_name: name.to_string(),
                provider_type: kind,
                capacity_status: None,
                contact_phone: None,
                has_water: true,
                has_sewer: true,
            }),
            provider_kind: ProviderKind::Mud,
            identifiers: ids,
            intrinsic_confidence: 0.9,
            method: ResolutionMethod::MudOverlay,
            provider_name: provider.to_string(),
        }
    }

    fn candidate(provider: &str, name: &str, ids: Identifiers) -> Candidate {
        typed_candidate(provider, name, ProviderKind::Mud, ids)
    }

    fn detector() -> ConflictDetector {
        ConflictDetector::new(0.55)
    }

    #[test]
    fn test_classification_split_conflicts_despite_similar_names() {
        let a = typed_candidate(
            "ccn",
            "Houston MUD Water",
            ProviderKind::Mud,
            Identifiers::default(),
        );
        let b = typed_candidate(
            "municipal",
            "Houston MUD Water",
            ProviderKind::Municipal,
            Identifiers::default(),
        );
        assert!(detector()
            .detect(FactType::WaterProvider, &[a, b])
            .is_some());
    }

    #[test]
    fn test_single_candidate_never_conflicts() {
        let c = candidate("mud", "Harris County MUD #1", Identifiers::default());
        assert!(detector()
            .detect(FactType::WaterProvider, &[c])
            .is_none());
    }

    #[test]
    fn test_identifier_disagreement_wins_over_similar_names() {
        let a = candidate(
            "ccn",
            "Harris County MUD #100",
            Identifiers {
                district_no: Some("100".to_string()),
                ..Default::default()
            },
        );
        let b = candidate(
            "mud",
            "Harris County MUD #101",
            Identifiers {
                district_no: Some("101".to_string()),
                ..Default::default()
            },
        );
        let record = detector()
            .detect(FactType::WaterProvider, &[a, b])
            .expect("district numbers differ");
        assert_eq!(record.competing.len(), 2);
    }

    #[test]
    fn test_matching_identifiers_suppress_name_noise() {
        let ids = Identifiers {
            district_no: Some("42".to_string()),
            ..Default::default()
        };
        let a = candidate("ccn", "Harris Co. Municipal Utility Dist 42", ids.clone());
        let b = candidate("mud", "HC MUD #42", ids);
        assert!(detector()
            .detect(FactType::WaterProvider, &[a, b])
            .is_none());
    }

    #[test]
    fn test_dissimilar_names_without_identifiers_conflict() {
        let a = candidate("ccn", "Quadvest LP", Identifiers::default());
        let b = candidate("municipal", "City of Houston Water", Identifiers::default());
        let record = detector()
            .detect(FactType::WaterProvider, &[a, b])
            .expect("names share almost nothing");
        assert!(record.detail.contains("Quadvest"));
    }

    #[test]
    fn test_similar_names_without_identifiers_agree() {
        let a = candidate("ccn", "City of Houston Water", Identifiers::default());
        let b = candidate("municipal", "City of Houston water", Identifiers::default());
        assert!(detector()
            .detect(FactType::WaterProvider, &[a, b])
            .is_none());
    }

    #[test]
    fn test_at_most_one_record_for_three_way_dispute() {
        let a = candidate("a", "Quadvest LP", Identifiers::default());
        let b = candidate("b", "City of Houston Water", Identifiers::default());
        let c = candidate("c", "Aqua Texas Inc", Identifiers::default());
        let record = detector()
            .detect(FactType::WaterProvider, &[a, b, c])
            .expect("all three disagree");
        assert_eq!(record.competing.len(), 3);
    }
}
