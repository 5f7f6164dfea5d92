//! Per-model usage counters.
//!
//! The failover executor writes these after every attempt; the scorer reads
//! them through an immutable [`UsageSnapshot`]. Counters live for the process
//! lifetime unless [`UsageTracker::reset`] is called.

use chrono::{DateTime, TimeZone, Utc};
use relay_abstraction::ProviderKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::types::ModelId;

#[derive(Debug, Default)]
struct ModelCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    successes: AtomicU64,
    // Millis since epoch; 0 means never used.
    last_used_ms: AtomicI64,
}

/// Point-in-time view of one model's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageStats {
    /// Failed attempts.
    pub recent_failure_count: u64,
    /// All attempts.
    pub recent_request_count: u64,
    /// Successful attempts.
    pub success_count: u64,
    /// Time of the last attempt.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl UsageStats {
    /// Fraction of attempts that failed, 0 when unused.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.recent_request_count == 0 {
            return 0.0;
        }
        (self.recent_failure_count as f64 / self.recent_request_count as f64).min(1.0)
    }
}

/// Immutable copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    stats: HashMap<ModelId, UsageStats>,
}

impl UsageSnapshot {
    /// Builds a snapshot from explicit stats (tests, replay).
    #[must_use]
    pub fn from_stats(stats: HashMap<ModelId, UsageStats>) -> Self {
        Self { stats }
    }

    /// Stats for a model; zeroes if never used.
    #[must_use]
    pub fn get(&self, id: &ModelId) -> UsageStats {
        self.stats.get(id).copied().unwrap_or_default()
    }

    /// Total attempts across every model of a provider.
    #[must_use]
    pub fn provider_requests(&self, provider: ProviderKind) -> u64 {
        self.stats
            .iter()
            .filter(|(id, _)| id.provider == provider)
            .map(|(_, s)| s.recent_request_count)
            .sum()
    }

    /// Iterates over every recorded model.
    pub fn iter(&self) -> impl Iterator<Item = (&ModelId, &UsageStats)> {
        self.stats.iter()
    }
}

/// Thread-safe usage counters keyed by model.
#[derive(Debug, Default)]
pub struct UsageTracker {
    models: RwLock<HashMap<ModelId, Arc<ModelCounters>>>,
}

impl UsageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, id: &ModelId) -> Arc<ModelCounters> {
        if let Some(c) = self.models.read().unwrap_or_else(PoisonError::into_inner).get(id) {
            return Arc::clone(c);
        }
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(models.entry(id.clone()).or_default())
    }

    /// Counts an attempt against the model.
    pub fn record_request(&self, id: &ModelId) {
        let c = self.counters(id);
        c.requests.fetch_add(1, Ordering::Relaxed);
        c.last_used_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Counts a successful attempt.
    pub fn record_success(&self, id: &ModelId) {
        self.counters(id).successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failed attempt.
    pub fn record_failure(&self, id: &ModelId) {
        self.counters(id).failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter into an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        let stats = models
            .iter()
            .map(|(id, c)| {
                let last = c.last_used_ms.load(Ordering::Relaxed);
                let stats = UsageStats {
                    recent_failure_count: c.failures.load(Ordering::Relaxed),
                    recent_request_count: c.requests.load(Ordering::Relaxed),
                    success_count: c.successes.load(Ordering::Relaxed),
                    last_used_at: (last > 0).then(|| Utc.timestamp_millis_opt(last).single()).flatten(),
                };
                (id.clone(), stats)
            })
            .collect();
        UsageSnapshot { stats }
    }

    /// Clears every counter.
    pub fn reset(&self) {
        self.models.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
