//! Wiring shared by every command: configuration, store, catalog, orchestrator.

use anyhow::{Context, Result};
use relay_abstraction::{ModelListing, ProviderClient, ProviderKind};
use relay_core::{SqliteTaskStore, TaskStore};
use relay_models::{MockProvider, ProviderFactory};
use relay_orchestrator::{ModelCatalog, ProviderSet, RelayConfig, TaskOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Options accepted by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub mock: bool,
}

/// Everything a command needs.
///
/// Background work started for the context (the live catalog refresh) stops
/// when it is dropped.
pub struct AppContext {
    pub orchestrator: Arc<TaskOrchestrator>,
    shutdown: CancellationToken,
}

impl AppContext {
    /// Loads configuration and assembles the orchestrator.
    pub async fn build(options: &GlobalOptions) -> Result<Self> {
        let mut config = RelayConfig::discover(options.config.as_deref())
            .context("Failed to load configuration")?;
        config.apply_process_env().context("Invalid RELAY_* environment override")?;

        let store: Arc<dyn TaskStore> = match &options.db {
            Some(path) => Arc::new(
                SqliteTaskStore::open(path)
                    .with_context(|| format!("Failed to open task database {}", path.display()))?,
            ),
            None => Arc::new(SqliteTaskStore::open_in_memory()?),
        };

        let lister = if options.mock { None } else { live_lister(&config) };
        let catalog = Arc::new(
            ModelCatalog::load_initial(lister.as_deref(), config.stale_cooldown()).await,
        );
        let shutdown = CancellationToken::new();
        if let Some(lister) = lister {
            config.spawn_catalog_refresh(&catalog, lister, shutdown.clone());
        }

        let orchestrator = if options.mock {
            TaskOrchestrator::with_providers(&config, store, catalog, mock_providers())?
        } else {
            TaskOrchestrator::from_config(&config, store, catalog)
                .context("No provider could be configured; set an API key or pass --mock")?
        };

        Ok(Self { orchestrator: Arc::new(orchestrator), shutdown })
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn live_lister(config: &RelayConfig) -> Option<Arc<dyn ModelListing>> {
    if !config.catalog.live_refresh {
        return None;
    }
    let lister = config
        .providers
        .iter()
        .filter(|p| p.kind == ProviderKind::OpenRouter)
        .find_map(|p| match ProviderFactory::create_listing(p) {
            Ok(lister) => lister,
            Err(err) => {
                warn!(error = %err, "Live model listing unavailable");
                None
            }
        });
    debug!(live = lister.is_some(), "Loading model catalog");
    lister
}

// Mock clients impersonate every real provider so the seed catalog stays routable.
fn mock_providers() -> ProviderSet {
    [ProviderKind::OpenRouter, ProviderKind::OpenAi, ProviderKind::Anthropic]
        .into_iter()
        .map(|kind| Arc::new(MockProvider::new(kind)) as Arc<dyn ProviderClient>)
        .collect()
}
