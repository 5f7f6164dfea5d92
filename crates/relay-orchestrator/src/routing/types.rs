//! Types for the model routing system.

use relay_abstraction::ProviderKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while selecting models.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Nothing in the catalog matches the request.
    #[error("no candidate models available")]
    NoCandidatesAvailable,

    /// A `provider:model` string could not be parsed.
    #[error("invalid model spec '{0}', expected 'provider:model'")]
    InvalidModelSpec(String),

    /// Unrecognized selection strategy name.
    #[error("unknown selection strategy '{0}', expected quality|speed|cost|balanced")]
    UnknownStrategy(String),
}

/// Fully qualified model identifier, rendered `provider:model`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    /// Backend serving the model.
    pub provider: ProviderKind,
    /// Provider-side model name. May itself contain `:` (e.g. `:free` suffixes).
    pub model: String,
}

impl ModelId {
    /// Creates a model id.
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

// Ordered by rendered text so that ties break alphabetically on `provider:model`.
impl Ord for ModelId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.provider
            .as_str()
            .cmp(other.provider.as_str())
            .then_with(|| self.model.cmp(&other.model))
    }
}

impl PartialOrd for ModelId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ModelId {
    type Err = RoutingError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (provider, model) =
            spec.split_once(':').ok_or_else(|| RoutingError::InvalidModelSpec(spec.to_string()))?;
        if model.is_empty() {
            return Err(RoutingError::InvalidModelSpec(spec.to_string()));
        }
        let provider =
            provider.parse().map_err(|_| RoutingError::InvalidModelSpec(spec.to_string()))?;
        Ok(Self::new(provider, model))
    }
}

/// Commercial tier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// No charge.
    Free,
    /// Low-cost general models.
    Standard,
    /// Premium models.
    Pro,
    /// Top-end models.
    Enterprise,
}

impl ModelTier {
    /// Score bonus for this tier.
    #[must_use]
    pub const fn bonus(&self) -> f64 {
        match self {
            Self::Free => 0.0,
            Self::Standard => 2.0,
            Self::Pro => 4.0,
            Self::Enterprise => 6.0,
        }
    }

    /// Infers a tier from the prompt price (USD per 1M tokens).
    #[must_use]
    pub fn from_price(cost_per_unit: f64) -> Self {
        if cost_per_unit <= 0.0 {
            Self::Free
        } else if cost_per_unit < 1.0 {
            Self::Standard
        } else if cost_per_unit < 10.0 {
            Self::Pro
        } else {
            Self::Enterprise
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        };
        f.write_str(name)
    }
}

/// Maximum `quality_score` a model can carry.
pub const MAX_QUALITY_SCORE: u8 = 40;
/// Maximum `reliability_score` a model can carry.
pub const MAX_RELIABILITY_SCORE: u8 = 30;

/// A model known to the catalog. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Fully qualified id.
    pub id: ModelId,
    /// Context window in tokens.
    pub context_window: u32,
    /// USD per 1M prompt tokens; 0 for free models.
    pub cost_per_unit: f64,
    /// Curated quality, 0..=40.
    pub quality_score: u8,
    /// Curated reliability, 0..=30.
    pub reliability_score: u8,
    /// Commercial tier.
    pub tier: ModelTier,
    /// Whether the model accepts tool / function definitions.
    pub supports_function_calling: bool,
}

impl ModelDescriptor {
    /// Creates a descriptor, clamping the curated scores to their ranges.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ModelId,
        context_window: u32,
        cost_per_unit: f64,
        quality_score: u8,
        reliability_score: u8,
        tier: ModelTier,
        supports_function_calling: bool,
    ) -> Self {
        Self {
            id,
            context_window,
            cost_per_unit: cost_per_unit.max(0.0),
            quality_score: quality_score.min(MAX_QUALITY_SCORE),
            reliability_score: reliability_score.min(MAX_RELIABILITY_SCORE),
            tier,
            supports_function_calling,
        }
    }

    /// True when the model costs nothing to call.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.cost_per_unit <= 0.0
    }
}

/// How candidates should be weighed against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Prefer the strongest models.
    Quality,
    /// Prefer quick, cheap-to-run models.
    Speed,
    /// Prefer the cheapest models.
    Cost,
    /// Weigh quality and cost evenly.
    #[default]
    Balanced,
}

impl SelectionStrategy {
    /// Multiplier applied to a model's quality score.
    #[must_use]
    pub const fn quality_weight(&self) -> f64 {
        match self {
            Self::Quality => 1.0,
            Self::Balanced => 0.75,
            Self::Speed | Self::Cost => 0.5,
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Quality => "quality",
            Self::Speed => "speed",
            Self::Cost => "cost",
            Self::Balanced => "balanced",
        };
        f.write_str(name)
    }
}

impl FromStr for SelectionStrategy {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "speed" => Ok(Self::Speed),
            "cost" => Ok(Self::Cost),
            "balanced" => Ok(Self::Balanced),
            _ => Err(RoutingError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Constraints a candidate must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelFilter {
    /// Minimum context window in tokens.
    pub min_context_window: Option<u32>,
    /// Only zero-cost models.
    pub free_only: bool,
    /// Only models with function calling.
    pub require_function_calling: bool,
    /// Restrict to these providers.
    pub providers: Option<Vec<ProviderKind>>,
}

impl ModelFilter {
    /// Returns true when the model satisfies every constraint.
    #[must_use]
    pub fn matches(&self, model: &ModelDescriptor) -> bool {
        if self.min_context_window.is_some_and(|min| model.context_window < min) {
            return false;
        }
        if self.free_only && !model.is_free() {
            return false;
        }
        if self.require_function_calling && !model.supports_function_calling {
            return false;
        }
        if let Some(providers) = &self.providers {
            if !providers.contains(&model.id.provider) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_keeps_colons_in_model_name() {
        let id: ModelId = "openrouter:qwen/qwen3-coder:free".parse().unwrap();
        assert_eq!(id.provider, ProviderKind::OpenRouter);
        assert_eq!(id.model, "qwen/qwen3-coder:free");
        assert_eq!(id.to_string(), "openrouter:qwen/qwen3-coder:free");
    }

    #[test]
    fn test_model_id_rejects_bad_specs() {
        assert!("gpt-4o".parse::<ModelId>().is_err());
        assert!("openai:".parse::<ModelId>().is_err());
        assert!("bedrock:titan".parse::<ModelId>().is_err());
    }

    #[test]
    fn test_model_id_orders_by_rendered_text() {
        let a = ModelId::new(ProviderKind::Anthropic, "z");
        let b = ModelId::new(ProviderKind::OpenAi, "a");
        assert!(a < b);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Cost".parse::<SelectionStrategy>().unwrap(), SelectionStrategy::Cost);
        assert_eq!(
            "fastest".parse::<SelectionStrategy>(),
            Err(RoutingError::UnknownStrategy("fastest".into()))
        );
        assert_eq!(SelectionStrategy::default().to_string(), "balanced");
    }

    #[test]
    fn test_descriptor_clamps_scores() {
        let m = ModelDescriptor::new(
            ModelId::new(ProviderKind::Mock, "m"),
            1000,
            -1.0,
            99,
            99,
            ModelTier::Free,
            false,
        );
        assert_eq!(m.quality_score, 40);
        assert_eq!(m.reliability_score, 30);
        assert!(m.is_free());
    }

    #[test]
    fn test_filter() {
        let m = ModelDescriptor::new(
            ModelId::new(ProviderKind::OpenAi, "gpt-4o"),
            128_000,
            2.5,
            36,
            27,
            ModelTier::Pro,
            true,
        );
        assert!(ModelFilter::default().matches(&m));
        assert!(!ModelFilter { free_only: true, ..Default::default() }.matches(&m));
        assert!(!ModelFilter { min_context_window: Some(200_000), ..Default::default() }.matches(&m));
        assert!(
            !ModelFilter { providers: Some(vec![ProviderKind::Anthropic]), ..Default::default() }
                .matches(&m)
        );
        assert!(ModelFilter { require_function_calling: true, ..Default::default() }.matches(&m));
        assert_eq!(ModelTier::from_price(0.0), ModelTier::Free);
        assert_eq!(ModelTier::from_price(15.0), ModelTier::Enterprise);
    }
}
