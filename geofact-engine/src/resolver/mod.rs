//! Priority resolver: the jurisdiction-aware provider cascade
//!
//! For one `(query, fact type)` pair the resolver filters the catalog down
//! to eligible providers, walks them in priority order, and short-circuits
//! on the first candidate whose intrinsic confidence clears the fact type's
//! acceptance threshold. Lower tiers are never invoked after acceptance;
//! that is the cost control. Each provider is tried exactly once per pass;
//! retry/backoff lives inside the tiered fetcher, one layer down.
//!
//! A pass ends in one of two terminal states: resolved, or unresolved.
//! Unresolved is a legitimate answer, not an error.

pub mod confidence;
pub mod conflict;

pub use confidence::ConfidenceAggregator;
pub use conflict::ConflictDetector;

use crate::providers::{ProviderCatalog, QueryContext};
use crate::types::{Candidate, FactType, ResolvedFact};
use geofact_common::config::{FactTuning, ResolutionConfig};
use std::sync::Arc;

/// Per-fact-type slot lookup on the config tuning block
pub fn fact_slot(tuning: &FactTuning, fact_type: FactType) -> f64 {
    match fact_type {
        FactType::WaterProvider => tuning.water,
        FactType::SewerProvider => tuning.sewer,
        FactType::StormProvider => tuning.storm,
        FactType::AddressIdentity => tuning.address,
    }
}

/// Outcome of one resolution pass for one fact type
#[derive(Debug, Clone)]
pub struct ResolverPass {
    pub fact: ResolvedFact,
    /// Every candidate returned during the pass, accepted or not; feeds the
    /// conflict detector when the pass was a cross-check
    pub candidates: Vec<Candidate>,
    /// Tier index (within the eligible ordering) of the accepted candidate
    pub accepted_tier: Option<usize>,
}

pub struct PriorityResolver {
    catalog: Arc<ProviderCatalog>,
    thresholds: FactTuning,
    aggregator: ConfidenceAggregator,
}

impl PriorityResolver {
    pub fn new(catalog: Arc<ProviderCatalog>, config: &ResolutionConfig) -> Self {
        Self {
            catalog,
            thresholds: config.acceptance_thresholds,
            aggregator: ConfidenceAggregator::new(config.tier_decay),
        }
    }

    pub fn acceptance_threshold(&self, fact_type: FactType) -> f64 {
        fact_slot(&self.thresholds, fact_type)
    }

    /// Sequential cascade with short-circuit on first acceptance
    pub async fn resolve(&self, ctx: &QueryContext, fact_type: FactType) -> ResolverPass {
        let threshold = self.acceptance_threshold(fact_type);
        let eligible: Vec<_> = self
            .catalog
            .providers_for(fact_type)
            .iter()
            .filter(|p| p.eligible(ctx))
            .cloned()
            .collect();

        let mut tried = Vec::new();
        let mut candidates = Vec::new();

        for (tier, provider) in eligible.iter().enumerate() {
            tried.push(provider.name().to_string());

            match provider.query(ctx, fact_type).await {
                Ok(Some(candidate)) => {
                    let accepted = candidate.intrinsic_confidence >= threshold;
                    tracing::debug!(
                        "{}: {} answered (confidence {:.2}, {})",
                        fact_type,
                        provider.name(),
                        candidate.intrinsic_confidence,
                        if accepted { "accepted" } else { "rejected" }
                    );
                    candidates.push(candidate.clone());
                    if accepted {
                        let final_confidence = self
                            .aggregator
                            .fact_confidence(candidate.intrinsic_confidence, tier);
                        return ResolverPass {
                            fact: ResolvedFact {
                                fact_type,
                                method: candidate.method,
                                candidate: Some(candidate),
                                confidence: final_confidence,
                                cached: false,
                                providers_tried: tried,
                            },
                            candidates,
                            accepted_tier: Some(tier),
                        };
                    }
                }
                Ok(None) => {
                    tracing::debug!("{}: {} had no answer", fact_type, provider.name());
                }
                Err(e) => {
                    // Provider failure cascades to the next tier
                    tracing::warn!("{}: {} failed: {}", fact_type, provider.name(), e);
                }
            }
        }

        ResolverPass {
            fact: ResolvedFact::unresolved(fact_type, tried),
            candidates,
            accepted_tier: None,
        }
    }

    /// Cross-check pass: invoke every eligible provider concurrently and
    /// keep all answers for conflict analysis. Acceptance still follows
    /// priority order.
    pub async fn cross_check(&self, ctx: &QueryContext, fact_type: FactType) -> ResolverPass {
        let threshold = self.acceptance_threshold(fact_type);
        let eligible: Vec<_> = self
            .catalog
            .providers_for(fact_type)
            .iter()
            .filter(|p| p.eligible(ctx))
            .cloned()
            .collect();

        let tried: Vec<String> = eligible.iter().map(|p| p.name().to_string()).collect();

        let results = futures::future::join_all(
            eligible.iter().map(|provider| provider.query(ctx, fact_type)),
        )
        .await;

        let mut candidates = Vec::new();
        let mut accepted: Option<(usize, Candidate)> = None;

        for (tier, result) in results.into_iter().enumerate() {
            match result {
                Ok(Some(candidate)) => {
                    if accepted.is_none() && candidate.intrinsic_confidence >= threshold {
                        accepted = Some((tier, candidate.clone()));
                    }
                    candidates.push(candidate);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{}: {} failed: {}", fact_type, eligible[tier].name(), e);
                }
            }
        }

        match accepted {
            Some((tier, candidate)) => {
                let final_confidence = self
                    .aggregator
                    .fact_confidence(candidate.intrinsic_confidence, tier);
                ResolverPass {
                    fact: ResolvedFact {
                        fact_type,
                        method: candidate.method,
                        candidate: Some(candidate),
                        confidence: final_confidence,
                        cached: false,
                        providers_tried: tried,
                    },
                    candidates,
                    accepted_tier: Some(tier),
                }
            }
            None => ResolverPass {
                fact: ResolvedFact::unresolved(fact_type, tried),
                candidates,
                accepted_tier: None,
            },
        }
    }
}
