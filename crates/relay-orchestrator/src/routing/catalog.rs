//! Registry of known models.
//!
//! The catalog starts from a curated seed list and can be refreshed from a
//! provider's live listing. Descriptors are immutable; a refresh swaps the
//! whole list at once. Models that misbehave (bad credentials) can be parked
//! with [`ModelCatalog::mark_stale`] for a cool-down period.

use relay_abstraction::{ListedModel, ModelListing, ProviderKind};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{ModelDescriptor, ModelFilter, ModelId, ModelTier};

/// Default cool-down applied by [`ModelCatalog::mark_stale`].
pub const DEFAULT_STALE_COOLDOWN: Duration = Duration::from_secs(300);

// Curated scores for models discovered only through a live listing.
const DISCOVERED_QUALITY: u8 = 20;
const DISCOVERED_RELIABILITY: u8 = 15;

/// Registry of candidate models.
#[derive(Debug)]
pub struct ModelCatalog {
    models: RwLock<Arc<Vec<ModelDescriptor>>>,
    stale: RwLock<HashMap<ModelId, Instant>>,
    stale_cooldown: Duration,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(seed_models(), DEFAULT_STALE_COOLDOWN)
    }
}

impl ModelCatalog {
    /// Creates a catalog over an explicit model list.
    #[must_use]
    pub fn new(models: Vec<ModelDescriptor>, stale_cooldown: Duration) -> Self {
        Self {
            models: RwLock::new(Arc::new(models)),
            stale: RwLock::new(HashMap::new()),
            stale_cooldown,
        }
    }

    /// Creates a catalog from the seed list, optionally refreshed live.
    ///
    /// A failed refresh is logged and the seed list is kept.
    pub async fn load_initial(
        lister: Option<&dyn ModelListing>,
        stale_cooldown: Duration,
    ) -> Self {
        let catalog = Self::new(seed_models(), stale_cooldown);
        if let Some(lister) = lister {
            catalog.refresh(lister).await;
        }
        info!(models = catalog.len(), "Model catalog loaded");
        catalog
    }

    /// Number of models, stale or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current().len()
    }

    /// True when the catalog holds no models.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<Vec<ModelDescriptor>> {
        Arc::clone(&self.models.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Models matching `filter`, excluding any still cooling down.
    #[must_use]
    pub fn list(&self, filter: &ModelFilter) -> Vec<ModelDescriptor> {
        let models = self.current();
        let stale = self.stale.read().unwrap_or_else(PoisonError::into_inner);
        models
            .iter()
            .filter(|m| filter.matches(m))
            .filter(|m| !stale.get(&m.id).is_some_and(|since| since.elapsed() < self.stale_cooldown))
            .cloned()
            .collect()
    }

    /// Looks up one model by id, stale or not.
    #[must_use]
    pub fn get(&self, id: &ModelId) -> Option<ModelDescriptor> {
        self.current().iter().find(|m| &m.id == id).cloned()
    }

    /// Excludes the model from [`ModelCatalog::list`] until the cool-down elapses.
    pub fn mark_stale(&self, id: &ModelId) {
        warn!(model_id = %id, cooldown_secs = self.stale_cooldown.as_secs(), "Marking model stale");
        self.stale.write().unwrap_or_else(PoisonError::into_inner).insert(id.clone(), Instant::now());
    }

    /// True while the model is cooling down.
    #[must_use]
    pub fn is_stale(&self, id: &ModelId) -> bool {
        self.stale
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|since| since.elapsed() < self.stale_cooldown)
    }

    /// Replaces the catalog's models wholesale.
    pub fn replace(&self, models: Vec<ModelDescriptor>) {
        *self.models.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(models);
    }

    /// Refreshes the OpenRouter portion of the catalog from a live listing.
    ///
    /// Known models keep their curated scores; new ones get conservative
    /// defaults and a tier derived from price. Models of other providers are
    /// untouched. Failures are logged and swallowed. Returns whether the
    /// catalog changed.
    pub async fn refresh(&self, lister: &dyn ModelListing) -> bool {
        let listed = match lister.list_models().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Model catalog refresh failed; keeping current list");
                return false;
            }
        };
        if listed.is_empty() {
            warn!("Model listing returned no models; keeping current list");
            return false;
        }

        let current = self.current();
        let mut merged: Vec<ModelDescriptor> =
            current.iter().filter(|m| m.id.provider != ProviderKind::OpenRouter).cloned().collect();
        let discovered = listed.len();
        merged.extend(listed.into_iter().map(|l| merge_listed(&current, l)));
        self.replace(merged);

        info!(discovered, total = self.len(), "Model catalog refreshed");
        true
    }

    /// Spawns a background task that refreshes every `interval` until `shutdown` fires.
    pub fn spawn_refresh(
        self: Arc<Self>,
        lister: Arc<dyn ModelListing>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs(), "Catalog refresh loop started");
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Catalog refresh loop stopped");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        self.refresh(lister.as_ref()).await;
                    }
                }
            }
        })
    }
}

fn merge_listed(current: &[ModelDescriptor], listed: ListedModel) -> ModelDescriptor {
    let id = ModelId::new(ProviderKind::OpenRouter, listed.id);
    let known = current.iter().find(|m| m.id == id);
    let (quality, reliability) = known
        .map_or((DISCOVERED_QUALITY, DISCOVERED_RELIABILITY), |m| (m.quality_score, m.reliability_score));
    let context_window = if listed.context_length > 0 {
        listed.context_length
    } else {
        known.map_or(0, |m| m.context_window)
    };
    ModelDescriptor::new(
        id,
        context_window,
        listed.prompt_price_per_million,
        quality,
        reliability,
        ModelTier::from_price(listed.prompt_price_per_million),
        listed.supports_tools,
    )
}

/// Curated seed list used until (or instead of) a live refresh.
#[must_use]
pub fn seed_models() -> Vec<ModelDescriptor> {
    use super::types::ModelTier::{Enterprise, Free, Pro, Standard};
    use relay_abstraction::ProviderKind::{Anthropic, OpenAi, OpenRouter};

    let m = |p, name: &str, ctx, cost, q, r, tier, tools| {
        ModelDescriptor::new(ModelId::new(p, name), ctx, cost, q, r, tier, tools)
    };
    vec![
        m(OpenRouter, "deepseek/deepseek-chat-v3-0324:free", 163_840, 0.0, 33, 18, Free, true),
        m(OpenRouter, "qwen/qwen3-coder:free", 262_144, 0.0, 31, 19, Free, true),
        m(OpenRouter, "meta-llama/llama-3.3-70b-instruct:free", 131_072, 0.0, 30, 20, Free, true),
        m(OpenRouter, "google/gemini-2.0-flash-exp:free", 1_048_576, 0.0, 28, 16, Free, true),
        m(OpenRouter, "mistralai/mistral-small-3.2-24b-instruct:free", 131_072, 0.0, 24, 20, Free, false),
        m(OpenRouter, "openai/gpt-4o-mini", 128_000, 0.15, 27, 27, Standard, true),
        m(OpenRouter, "anthropic/claude-sonnet-4.5", 1_000_000, 3.0, 39, 28, Pro, true),
        m(OpenAi, "gpt-4o-mini", 128_000, 0.15, 27, 26, Standard, true),
        m(OpenAi, "gpt-4o", 128_000, 2.5, 36, 27, Pro, true),
        m(Anthropic, "claude-3-5-haiku-latest", 200_000, 0.8, 29, 27, Standard, true),
        m(Anthropic, "claude-sonnet-4-5", 200_000, 3.0, 39, 28, Pro, true),
        m(Anthropic, "claude-opus-4-1", 200_000, 15.0, 40, 28, Enterprise, true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_abstraction::ProviderError;

    struct FixedListing(Result<Vec<ListedModel>, ProviderError>);

    #[async_trait]
    impl ModelListing for FixedListing {
        async fn list_models(&self) -> Result<Vec<ListedModel>, ProviderError> {
            self.0.clone()
        }
    }

    fn listed(id: &str, ctx: u32, price: f64) -> ListedModel {
        ListedModel {
            id: id.to_string(),
            context_length: ctx,
            prompt_price_per_million: price,
            supports_tools: true,
        }
    }

    #[test]
    fn test_list_filters_and_never_mutates() {
        let catalog = ModelCatalog::default();
        let before = catalog.len();
        let free = catalog.list(&ModelFilter { free_only: true, ..Default::default() });
        assert!(!free.is_empty());
        assert!(free.iter().all(ModelDescriptor::is_free));
        assert_eq!(catalog.len(), before);
    }

    #[test]
    fn test_mark_stale_hides_until_cooldown() {
        let catalog = ModelCatalog::new(seed_models(), Duration::from_millis(30));
        let id = ModelId::new(ProviderKind::OpenAi, "gpt-4o");
        catalog.mark_stale(&id);
        assert!(catalog.is_stale(&id));
        assert!(catalog.list(&ModelFilter::default()).iter().all(|m| m.id != id));
        assert!(catalog.get(&id).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(!catalog.is_stale(&id));
        assert!(catalog.list(&ModelFilter::default()).iter().any(|m| m.id == id));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_seed() {
        let lister = FixedListing(Err(ProviderError::TransportError("down".into())));
        let catalog = ModelCatalog::load_initial(Some(&lister as &dyn ModelListing), DEFAULT_STALE_COOLDOWN).await;
        assert_eq!(catalog.len(), seed_models().len());
    }

    #[tokio::test]
    async fn test_refresh_merges_curated_scores() {
        let lister = FixedListing(Ok(vec![
            listed("qwen/qwen3-coder:free", 262_144, 0.0),
            listed("moonshotai/kimi-k2", 131_072, 0.6),
        ]));
        let catalog = ModelCatalog::default();
        assert!(catalog.refresh(&lister).await);

        let qwen = catalog.get(&ModelId::new(ProviderKind::OpenRouter, "qwen/qwen3-coder:free")).unwrap();
        assert_eq!(qwen.quality_score, 31);

        let kimi = catalog.get(&ModelId::new(ProviderKind::OpenRouter, "moonshotai/kimi-k2")).unwrap();
        assert_eq!(kimi.tier, ModelTier::Standard);
        assert_eq!(kimi.quality_score, DISCOVERED_QUALITY);

        // Unlisted OpenRouter seeds are dropped; direct vendors stay.
        assert!(catalog.get(&ModelId::new(ProviderKind::OpenRouter, "openai/gpt-4o-mini")).is_none());
        assert!(catalog.get(&ModelId::new(ProviderKind::Anthropic, "claude-opus-4-1")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_refresh_stops_on_shutdown() {
        let catalog = Arc::new(ModelCatalog::default());
        let lister: Arc<dyn ModelListing> =
            Arc::new(FixedListing(Ok(vec![listed("x-ai/grok-4-fast:free", 2_000_000, 0.0)])));
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&catalog).spawn_refresh(lister, Duration::from_secs(60), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(catalog.get(&ModelId::new(ProviderKind::OpenRouter, "x-ai/grok-4-fast:free")).is_some());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
