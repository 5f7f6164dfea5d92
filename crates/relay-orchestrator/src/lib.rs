//! Task orchestrator for Relay.
//!
//! Ranks catalog models for each task, runs them through sequential failover,
//! and records the outcome on the task.

pub mod config;
pub mod error;
pub mod failover;
pub mod orchestrator;
pub mod pool;
pub mod routing;

pub use config::{ConfigError, RelayConfig};
pub use error::{OrchestrationError, Result};
pub use failover::{
    AttemptRecord, FailoverError, FailoverExecutor, FailoverOutcome, FailoverSettings, FailureKind,
    ProviderSet,
};
pub use orchestrator::{OrchestratorSettings, TaskOrchestrator};
pub use pool::TaskWorkerPool;
pub use routing::{
    ModelCatalog, ModelDescriptor, ModelFilter, ModelId, ModelScorer, ModelTier, RoutingError,
    ScoredModel, SelectionStrategy, UsageSnapshot, UsageStats, UsageTracker,
};
