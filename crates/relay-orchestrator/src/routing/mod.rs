//! Model routing: which models exist, how they have behaved, and which one to
//! try first.

pub mod catalog;
pub mod scorer;
pub mod types;
pub mod usage;

pub use catalog::{DEFAULT_STALE_COOLDOWN, ModelCatalog, seed_models};
pub use scorer::{ModelScorer, ScoreBreakdown, ScoredModel};
pub use types::{ModelDescriptor, ModelFilter, ModelId, ModelTier, RoutingError, SelectionStrategy};
pub use usage::{UsageSnapshot, UsageStats, UsageTracker};
