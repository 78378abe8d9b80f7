//! Confidence aggregation
//!
//! Each accepted candidate carries an intrinsic confidence assigned by its
//! provider adapter. The aggregator decays it by the number of
//! higher-priority tiers that were skipped or came up empty, so a fact
//! resolved at tier 3 scores strictly lower than the same fact at tier 1.
//! Overall bundle confidence is the arithmetic mean over resolved facts.

use crate::types::ResolvedFact;

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceAggregator {
    tier_decay: f64,
}

impl ConfidenceAggregator {
    pub fn new(tier_decay: f64) -> Self {
        Self { tier_decay }
    }

    /// Final confidence for a fact accepted at the given tier index
    /// (0 = highest-priority eligible provider)
    pub fn fact_confidence(&self, intrinsic: f64, tiers_skipped: usize) -> f64 {
        (intrinsic * self.tier_decay.powi(tiers_skipped as i32)).clamp(0.0, 1.0)
    }

    /// Mean of per-fact confidences over resolved facts; 0.0 when no fact
    /// resolved at all
    pub fn overall<'a>(&self, facts: impl Iterator<Item = &'a ResolvedFact>) -> f64 {
        let resolved: Vec<f64> = facts
            .filter(|f| f.is_resolved())
            .map(|f| f.confidence)
            .collect();
        if resolved.is_empty() {
            0.0
        } else {
            resolved.iter().sum::<f64>() / resolved.len() as f64
        }
    }
}
