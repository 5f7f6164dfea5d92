//! TOML configuration for the orchestrator.
//!
//! ```toml
//! [routing]
//! strategy = "cost"
//! max_fallbacks = 3
//! attempt_timeout_secs = 120
//!
//! [catalog]
//! free_only = true
//! live_refresh = true
//!
//! [[providers]]
//! kind = "openrouter"
//! api_key_env = "OPENROUTER_API_KEY"
//! ```

use relay_abstraction::ModelListing;
use relay_models::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::failover::{DEFAULT_MAX_FALLBACKS, FailoverSettings};
use crate::orchestrator::OrchestratorSettings;
use crate::routing::{ModelCatalog, ModelFilter, SelectionStrategy};

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "relay.toml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// `[routing]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// Selection strategy name.
    pub strategy: String,
    /// Attempts per task before giving up.
    pub max_fallbacks: usize,
    /// Time budget per attempt.
    pub attempt_timeout_secs: u64,
    /// How long a model rejected for bad credentials stays out of rotation.
    pub stale_cooldown_secs: u64,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            strategy: "balanced".to_string(),
            max_fallbacks: DEFAULT_MAX_FALLBACKS,
            attempt_timeout_secs: 300,
            stale_cooldown_secs: 300,
        }
    }
}

/// `[catalog]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Fetch the live model list at startup and periodically after.
    pub live_refresh: bool,
    /// Interval between live refreshes.
    pub refresh_interval_secs: u64,
    /// Only route to zero-cost models.
    pub free_only: bool,
    /// Minimum context window, in tokens.
    pub min_context_window: Option<u32>,
    /// Only route to models with function calling.
    pub require_function_calling: bool,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            live_refresh: false,
            refresh_interval_secs: 3600,
            free_only: false,
            min_context_window: None,
            require_function_calling: false,
        }
    }
}

/// `[request]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSection {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Prepended to every request when set.
    pub system_prompt: Option<String>,
}

impl Default for RequestSection {
    fn default() -> Self {
        Self { max_tokens: 2048, temperature: 0.7, system_prompt: None }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// Tasks processed at the same time.
    pub max_concurrent_tasks: usize,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self { max_concurrent_tasks: 4 }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Candidate ranking and failover.
    pub routing: RoutingSection,
    /// Catalog filters and refresh.
    pub catalog: CatalogSection,
    /// Request template.
    pub request: RequestSection,
    /// Worker pool.
    pub workers: WorkersSection,
    /// Provider backends to register.
    pub providers: Vec<ProviderConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            routing: RoutingSection::default(),
            catalog: CatalogSection::default(),
            request: RequestSection::default(),
            workers: WorkersSection::default(),
            providers: vec![ProviderConfig::new(relay_abstraction::ProviderKind::OpenRouter)],
        }
    }
}

impl RelayConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the configuration file from explicit and conventional locations.
    ///
    /// Order: `explicit`, `<cwd>/relay.toml`, `<home>/.relay/config.toml`.
    /// Falls back to defaults when none exists. An explicit path that does not
    /// exist is an error.
    ///
    /// # Errors
    /// Returns an error if the chosen file cannot be loaded.
    pub fn discover_in(explicit: Option<&Path>, cwd: &Path, home: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let mut candidates = vec![cwd.join(CONFIG_FILE_NAME)];
        if let Some(home) = home {
            candidates.push(home.join(".relay").join("config.toml"));
        }
        for path in candidates {
            if path.is_file() {
                info!(path = %path.display(), "Using configuration file");
                return Self::load(&path);
            }
        }
        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// [`RelayConfig::discover_in`] against the process working directory and `$HOME`.
    ///
    /// # Errors
    /// Returns an error if the chosen file cannot be loaded.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::discover_in(explicit, &cwd, home.as_deref())
    }

    /// Applies `RELAY_*` overrides read through `lookup`, then re-validates.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for unparsable values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strategy) = lookup("RELAY_STRATEGY") {
            self.routing.strategy = strategy;
        }
        if let Some(v) = lookup("RELAY_MAX_FALLBACKS") {
            self.routing.max_fallbacks = parse_number("RELAY_MAX_FALLBACKS", &v)?;
        }
        if let Some(v) = lookup("RELAY_ATTEMPT_TIMEOUT_SECS") {
            self.routing.attempt_timeout_secs = parse_number("RELAY_ATTEMPT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("RELAY_MAX_CONCURRENT_TASKS") {
            self.workers.max_concurrent_tasks = parse_number("RELAY_MAX_CONCURRENT_TASKS", &v)?;
        }
        self.validate()
    }

    /// [`RelayConfig::apply_env_overrides`] against the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for unparsable values.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.strategy()?;
        if self.routing.max_fallbacks == 0 {
            return Err(ConfigError::Validation("routing.max_fallbacks must be at least 1".into()));
        }
        if self.routing.attempt_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "routing.attempt_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.catalog.live_refresh && self.catalog.refresh_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "catalog.refresh_interval_secs must be greater than 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.request.temperature) {
            return Err(ConfigError::Validation(format!(
                "request.temperature must be between 0 and 2, got {}",
                self.request.temperature
            )));
        }
        if self.request.max_tokens == 0 {
            return Err(ConfigError::Validation("request.max_tokens must be greater than 0".into()));
        }
        if self.workers.max_concurrent_tasks == 0 {
            return Err(ConfigError::Validation(
                "workers.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The configured selection strategy.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for an unknown name.
    pub fn strategy(&self) -> Result<SelectionStrategy> {
        self.routing.strategy.parse().map_err(|e| ConfigError::Validation(format!("routing.strategy: {e}")))
    }

    /// Failover limits.
    #[must_use]
    pub const fn failover_settings(&self) -> FailoverSettings {
        FailoverSettings {
            max_fallbacks: self.routing.max_fallbacks,
            attempt_timeout: Duration::from_secs(self.routing.attempt_timeout_secs),
        }
    }

    /// Catalog constraints.
    #[must_use]
    pub const fn model_filter(&self) -> ModelFilter {
        ModelFilter {
            min_context_window: self.catalog.min_context_window,
            free_only: self.catalog.free_only,
            require_function_calling: self.catalog.require_function_calling,
            providers: None,
        }
    }

    /// Stale cool-down for the catalog.
    #[must_use]
    pub const fn stale_cooldown(&self) -> Duration {
        Duration::from_secs(self.routing.stale_cooldown_secs)
    }

    /// Live refresh interval.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.catalog.refresh_interval_secs)
    }

    /// Starts the periodic catalog refresh when `[catalog] live_refresh` is set.
    ///
    /// The loop refreshes from `lister` every `refresh_interval_secs` and stops
    /// when `shutdown` fires. Returns `None` when live refresh is off.
    pub fn spawn_catalog_refresh(
        &self,
        catalog: &Arc<ModelCatalog>,
        lister: Arc<dyn ModelListing>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.catalog.live_refresh {
            return None;
        }
        info!(interval_secs = self.catalog.refresh_interval_secs, "Starting live catalog refresh");
        Some(Arc::clone(catalog).spawn_refresh(lister, self.refresh_interval(), shutdown))
    }

    /// Settings for the task orchestrator.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for an unknown strategy.
    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings> {
        Ok(OrchestratorSettings {
            strategy: self.strategy()?,
            filter: self.model_filter(),
            max_tokens: self.request.max_tokens,
            temperature: self.request.temperature,
            system_prompt: self.request.system_prompt.clone(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{name} must be a non-negative integer, got '{value}'")))
}
