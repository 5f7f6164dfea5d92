//! Command implementations for the Relay CLI.

pub mod models;
pub mod task;
pub mod types;

use anyhow::{Context, Result};
use relay_orchestrator::SelectionStrategy;

/// Parses an explicit strategy or falls back to the configured one.
pub fn resolve_strategy(explicit: Option<&str>, configured: SelectionStrategy) -> Result<SelectionStrategy> {
    explicit.map_or(Ok(configured), |s| s.parse().context("Invalid --strategy"))
}
