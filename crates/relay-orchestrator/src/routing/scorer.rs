//! Model ranking.
//!
//! ```text
//! score = quality_bonus + reliability_bonus + cost_optimization
//!       + tier_bonus + provider_diversity_bonus - frequency_penalty
//! ```
//!
//! Ranking is a pure function of the candidates, the strategy, and a usage
//! snapshot, and always yields the same total order for the same inputs.

use relay_abstraction::ProviderKind;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::types::{ModelDescriptor, RoutingError, SelectionStrategy};
use super::usage::{UsageSnapshot, UsageStats};

const FREE_COST_BONUS: f64 = 25.0;
const PAID_COST_PENALTY_CAP: f64 = 10.0;
const DIVERSITY_BONUS: f64 = 3.0;
const FREQUENCY_PENALTY_PER_REQUEST: f64 = 0.5;
const FREQUENCY_PENALTY_CAP: f64 = 10.0;

/// Individual terms of a model's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// `quality_score × strategy weight`.
    pub quality: f64,
    /// `reliability_score × (1 − failure_rate)`.
    pub reliability: f64,
    /// Strategy-dependent cost term; may be negative.
    pub cost: f64,
    /// Tier bonus.
    pub tier: f64,
    /// Bonus for under-used providers.
    pub diversity: f64,
    /// Subtracted for heavy recent use.
    pub frequency_penalty: f64,
}

impl ScoreBreakdown {
    /// Sum of all terms.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.quality + self.reliability + self.cost + self.tier + self.diversity
            - self.frequency_penalty
    }
}

/// A candidate together with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredModel {
    /// The candidate.
    pub model: ModelDescriptor,
    /// Final score.
    pub score: f64,
    /// How the score was assembled.
    pub breakdown: ScoreBreakdown,
    /// Usage at ranking time.
    #[serde(skip)]
    pub stats: UsageStats,
}

/// Ranks candidate models.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelScorer;

impl ModelScorer {
    /// Scores one model.
    #[must_use]
    pub fn score(
        model: &ModelDescriptor,
        strategy: SelectionStrategy,
        stats: &UsageStats,
        underused_provider: bool,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            quality: f64::from(model.quality_score) * strategy.quality_weight(),
            reliability: f64::from(model.reliability_score) * (1.0 - stats.failure_rate()),
            cost: cost_optimization(model, strategy),
            tier: model.tier.bonus(),
            diversity: if underused_provider { DIVERSITY_BONUS } else { 0.0 },
            frequency_penalty: (FREQUENCY_PENALTY_PER_REQUEST * stats.recent_request_count as f64)
                .min(FREQUENCY_PENALTY_CAP),
        }
    }

    /// Orders candidates most-preferred first.
    ///
    /// Ties on score break on larger context window, then fewer failures, then
    /// model id ascending.
    ///
    /// # Errors
    /// Returns `RoutingError::NoCandidatesAvailable` for an empty input.
    pub fn rank(
        candidates: &[ModelDescriptor],
        strategy: SelectionStrategy,
        usage: &UsageSnapshot,
    ) -> Result<Vec<ScoredModel>, RoutingError> {
        if candidates.is_empty() {
            return Err(RoutingError::NoCandidatesAvailable);
        }

        let providers: BTreeSet<ProviderKind> = candidates.iter().map(|m| m.id.provider).collect();
        let mean_requests = providers.iter().map(|p| usage.provider_requests(*p) as f64).sum::<f64>()
            / providers.len() as f64;

        let mut ranked: Vec<ScoredModel> = candidates
            .iter()
            .map(|model| {
                let stats = usage.get(&model.id);
                let underused = (usage.provider_requests(model.id.provider) as f64) < mean_requests;
                let breakdown = Self::score(model, strategy, &stats, underused);
                ScoredModel { model: model.clone(), score: breakdown.total(), breakdown, stats }
            })
            .collect();

        ranked.sort_by(compare_ranked);
        Ok(ranked)
    }
}

fn cost_optimization(model: &ModelDescriptor, strategy: SelectionStrategy) -> f64 {
    let cost = model.cost_per_unit;
    let saving = if model.is_free() { FREE_COST_BONUS } else { FREE_COST_BONUS / (1.0 + cost) };
    match strategy {
        SelectionStrategy::Cost => saving,
        SelectionStrategy::Balanced => saving / 2.0,
        SelectionStrategy::Speed | SelectionStrategy::Quality => {
            -(cost * 0.5).min(PAID_COST_PENALTY_CAP)
        }
    }
}

// Scores are compared at micro-point resolution so that float noise from
// different summation orders cannot reorder otherwise equal candidates.
fn score_key(score: f64) -> i64 {
    (score * 1_000_000.0).round() as i64
}

fn compare_ranked(a: &ScoredModel, b: &ScoredModel) -> Ordering {
    score_key(b.score)
        .cmp(&score_key(a.score))
        .then_with(|| b.model.context_window.cmp(&a.model.context_window))
        .then_with(|| a.stats.recent_failure_count.cmp(&b.stats.recent_failure_count))
        .then_with(|| a.model.id.cmp(&b.model.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::{ModelId, ModelTier};
    use std::collections::HashMap;

    fn model(provider: ProviderKind, name: &str, ctx: u32, cost: f64, q: u8, r: u8) -> ModelDescriptor {
        ModelDescriptor::new(
            ModelId::new(provider, name),
            ctx,
            cost,
            q,
            r,
            ModelTier::from_price(cost),
            true,
        )
    }

    fn ids(ranked: &[ScoredModel]) -> Vec<String> {
        ranked.iter().map(|s| s.model.id.to_string()).collect()
    }

    #[test]
    fn test_empty_candidates() {
        let err = ModelScorer::rank(&[], SelectionStrategy::Balanced, &UsageSnapshot::default());
        assert_eq!(err, Err(RoutingError::NoCandidatesAvailable));
    }

    #[test]
    fn test_breakdown_terms() {
        let m = model(ProviderKind::OpenAi, "gpt-4o", 128_000, 3.0, 36, 27);
        let stats = UsageStats {
            recent_failure_count: 1,
            recent_request_count: 4,
            success_count: 3,
            last_used_at: None,
        };

        let q = ModelScorer::score(&m, SelectionStrategy::Quality, &stats, false);
        assert!((q.quality - 36.0).abs() < 1e-9);
        assert!((q.reliability - 27.0 * 0.75).abs() < 1e-9);
        assert!((q.cost + 1.5).abs() < 1e-9);
        assert!((q.tier - 4.0).abs() < 1e-9);
        assert!((q.frequency_penalty - 2.0).abs() < 1e-9);

        let c = ModelScorer::score(&m, SelectionStrategy::Cost, &stats, true);
        assert!((c.quality - 18.0).abs() < 1e-9);
        assert!((c.cost - 25.0 / 4.0).abs() < 1e-9);
        assert!((c.diversity - 3.0).abs() < 1e-9);

        let b = ModelScorer::score(&m, SelectionStrategy::Balanced, &stats, false);
        assert!((b.cost - 25.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_strategy_prefers_free_models() {
        let candidates = vec![
            model(ProviderKind::Anthropic, "claude-opus-4-1", 200_000, 15.0, 40, 28),
            model(ProviderKind::OpenRouter, "meta-llama/llama-3.3-70b-instruct:free", 131_072, 0.0, 30, 20),
        ];
        let ranked =
            ModelScorer::rank(&candidates, SelectionStrategy::Cost, &UsageSnapshot::default()).unwrap();
        assert_eq!(ranked[0].model.id.provider, ProviderKind::OpenRouter);

        let ranked =
            ModelScorer::rank(&candidates, SelectionStrategy::Quality, &UsageSnapshot::default())
                .unwrap();
        assert_eq!(ranked[0].model.id.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn test_tie_breaks_are_deterministic() {
        // Identical scores; only the tie-break keys differ.
        let candidates = vec![
            model(ProviderKind::OpenRouter, "b", 32_000, 0.0, 20, 20),
            model(ProviderKind::OpenRouter, "a", 32_000, 0.0, 20, 20),
            model(ProviderKind::OpenRouter, "c", 64_000, 0.0, 20, 20),
        ];
        let first =
            ModelScorer::rank(&candidates, SelectionStrategy::Cost, &UsageSnapshot::default()).unwrap();
        assert_eq!(ids(&first), vec!["openrouter:c", "openrouter:a", "openrouter:b"]);

        let mut reversed = candidates;
        reversed.reverse();
        let second =
            ModelScorer::rank(&reversed, SelectionStrategy::Cost, &UsageSnapshot::default()).unwrap();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_usage_shifts_ranking() {
        let hot = model(ProviderKind::OpenRouter, "hot", 32_000, 0.0, 25, 20);
        let cold = model(ProviderKind::OpenAi, "cold", 32_000, 0.0, 25, 20);
        let mut stats = HashMap::new();
        stats.insert(
            hot.id.clone(),
            UsageStats {
                recent_failure_count: 2,
                recent_request_count: 6,
                success_count: 4,
                last_used_at: None,
            },
        );
        let usage = UsageSnapshot::from_stats(stats);

        let ranked = ModelScorer::rank(&[hot, cold], SelectionStrategy::Balanced, &usage).unwrap();
        assert_eq!(ranked[0].model.id.model, "cold");
        assert!((ranked[0].breakdown.diversity - 3.0).abs() < 1e-9);
        assert!((ranked[1].breakdown.frequency_penalty - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_scored_model_serializes_without_stats() {
        let m = model(ProviderKind::OpenRouter, "qwen/qwen3-coder:free", 262_144, 0.0, 31, 19);
        let ranked = ModelScorer::rank(&[m], SelectionStrategy::Cost, &UsageSnapshot::default()).unwrap();
        let value = serde_json::to_value(&ranked[0]).unwrap();
        assert_eq!(value["model"]["id"]["provider"], "openrouter");
        assert_eq!(value["breakdown"]["cost"], 25.0);
        assert!(value.get("stats").is_none());
    }

    #[test]
    fn test_frequency_penalty_is_capped() {
        let m = model(ProviderKind::Mock, "m", 1, 0.0, 0, 0);
        let stats = UsageStats { recent_request_count: 1_000, ..Default::default() };
        let b = ModelScorer::score(&m, SelectionStrategy::Speed, &stats, false);
        assert!((b.frequency_penalty - 10.0).abs() < 1e-9);
    }
}
