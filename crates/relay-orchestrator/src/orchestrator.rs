//! Task orchestration.
//!
//! [`TaskOrchestrator`] drives a task through its lifecycle: pre-flight
//! validation, candidate ranking, failover execution, and the terminal
//! transition. Every mutation goes through the [`TaskStore`].
//!
//! Mutations of one task are serialized by a per-task async lock. Starting a
//! task opens a run (a cancellation token); `process` claims that run under
//! the lock, so a task is processed at most once per run and a canceled task
//! cannot be processed at all. Providers run without the lock held. Before
//! each attempt the stored state is re-read, which also stops the run when
//! another process cancels the task in a shared database. Results are
//! published under the lock after re-checking that the task is still
//! `working`, so a task canceled mid-call never receives a completion
//! artifact.

use relay_abstraction::{ChatMessage, ChatRole, ProviderRequest};
use relay_core::{
    Artifact, ArtifactKind, ArtifactMetadata, Message, Part, Role, StoreError, Task, TaskId, TaskState,
    TaskStore, TransitionError,
};
use relay_models::ProviderFactory;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{OrchestrationError, Result};
use crate::failover::{FailoverError, FailoverExecutor, FailoverOutcome, ProviderSet};
use crate::routing::{
    ModelCatalog, ModelFilter, ModelScorer, RoutingError, ScoredModel, SelectionStrategy, UsageTracker,
};

/// Status message for tasks rejected at pre-flight.
pub const REJECTED_NO_INPUT: &str = "task has no user message with text content";
/// Status message for tasks canceled on request.
pub const CANCELED_BY_REQUEST: &str = "canceled by request";

/// Request template and candidate constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Strategy used when the caller does not pick one.
    pub strategy: SelectionStrategy,
    /// Constraints on candidate models.
    pub filter: ModelFilter,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Prepended as a system message when set.
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let template = ProviderRequest::default();
        Self {
            strategy: SelectionStrategy::default(),
            filter: ModelFilter::default(),
            max_tokens: template.max_tokens,
            temperature: template.temperature,
            system_prompt: None,
        }
    }
}

// One `working` stint of a task, from start or resume until it settles.
#[derive(Debug)]
struct TaskRun {
    id: u64,
    token: CancellationToken,
    claimed: bool,
}

/// Runs tasks against the model catalog.
pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    catalog: Arc<ModelCatalog>,
    usage: Arc<UsageTracker>,
    executor: FailoverExecutor,
    settings: OrchestratorSettings,
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
    runs: Mutex<HashMap<TaskId, TaskRun>>,
    next_run: AtomicU64,
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("catalog_size", &self.catalog.len())
            .field("executor", &self.executor)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TaskOrchestrator {
    /// Creates an orchestrator.
    ///
    /// The executor should share `usage` so that ranking sees its counters.
    pub fn new(
        store: Arc<dyn TaskStore>,
        catalog: Arc<ModelCatalog>,
        usage: Arc<UsageTracker>,
        executor: FailoverExecutor,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            usage,
            executor,
            settings,
            locks: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(1),
        }
    }

    /// Builds an orchestrator with every provider listed in `config`.
    ///
    /// Providers whose client cannot be created (usually a missing API key)
    /// are skipped with a warning.
    ///
    /// # Errors
    /// * `ProviderError` - If no provider could be created
    /// * `ConfigError` - If the configuration is invalid
    pub fn from_config(
        config: &RelayConfig,
        store: Arc<dyn TaskStore>,
        catalog: Arc<ModelCatalog>,
    ) -> Result<Self> {
        let mut providers = ProviderSet::new();
        let mut last_error = None;
        for provider in &config.providers {
            match ProviderFactory::create(provider) {
                Ok(client) => providers.insert_as(provider.kind, client),
                Err(err) => {
                    warn!(provider = %provider.kind, error = %err, "Skipping provider");
                    last_error = Some(err);
                }
            }
        }
        if providers.is_empty() {
            if let Some(err) = last_error {
                return Err(err.into());
            }
        }
        Self::with_providers(config, store, catalog, providers)
    }

    /// Builds an orchestrator over explicit provider clients.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn with_providers(
        config: &RelayConfig,
        store: Arc<dyn TaskStore>,
        catalog: Arc<ModelCatalog>,
        providers: ProviderSet,
    ) -> Result<Self> {
        config.validate()?;
        let settings = config.orchestrator_settings()?;
        let usage = Arc::new(UsageTracker::new());
        let executor = FailoverExecutor::new(providers, Arc::clone(&usage), config.failover_settings())
            .with_catalog(Arc::clone(&catalog));
        Ok(Self::new(store, catalog, usage, executor, settings))
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// The model catalog.
    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// Usage counters.
    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Active settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Creates a `submitted` task whose history starts with `message`.
    ///
    /// # Errors
    /// Returns a store error if the task cannot be created.
    pub async fn submit(&self, message: Message) -> Result<Task> {
        let task = Task::builder().message(message).build();
        let id = self.store.create(task).await?;
        info!(task_id = %id, "Task submitted");
        Ok(self.store.get(&id).await?)
    }

    /// [`TaskOrchestrator::submit`] with a plain-text user message.
    ///
    /// # Errors
    /// Returns a store error if the task cannot be created.
    pub async fn submit_text(&self, text: impl Into<String> + Send) -> Result<Task> {
        self.submit(Message::text(Role::User, text)).await
    }

    /// Loads a task.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` for unknown ids.
    pub async fn get(&self, task_id: &str) -> Result<Task> {
        Ok(self.store.get(task_id).await?)
    }

    /// Lists every task, newest first.
    ///
    /// # Errors
    /// Returns a store error if the backend fails.
    pub async fn list(&self) -> Result<Vec<Task>> {
        Ok(self.store.list().await?)
    }

    /// Moves a `submitted` task to `working`, or to `rejected` when it has no
    /// user message with text.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    /// * `TransitionError::TaskAlreadyTerminal` - If the task already finished
    /// * `TransitionError::IllegalTransition` - If the task is not `submitted`
    pub async fn start(&self, task_id: &str) -> Result<Task> {
        let (_guard, task) = self.lock_existing(task_id).await?;
        require_state(&task, TaskState::Submitted, TaskState::Working)?;

        let has_input = task.history.iter().any(|m| m.role == Role::User && m.has_text());
        if !has_input {
            warn!(task_id = %task_id, "Rejecting task without user input");
            let task = self
                .store
                .update_status(task_id, TaskState::Rejected, Some(REJECTED_NO_INPUT.to_string()))
                .await?;
            self.forget(task_id);
            return Ok(task);
        }

        let task = self.store.update_status(task_id, TaskState::Working, None).await?;
        self.open_run(task_id);
        info!(task_id = %task_id, "Task started");
        Ok(task)
    }

    /// Ranks the catalog for `strategy` under the configured constraints.
    ///
    /// Only providers with a registered client are considered unless the
    /// filter names providers itself.
    ///
    /// # Errors
    /// Returns `RoutingError::NoCandidatesAvailable` if nothing matches.
    pub fn rank(&self, strategy: SelectionStrategy) -> std::result::Result<Vec<ScoredModel>, RoutingError> {
        let mut filter = self.settings.filter.clone();
        if filter.providers.is_none() {
            filter.providers = Some(self.executor.providers().kinds());
        }
        let candidates = self.catalog.list(&filter);
        ModelScorer::rank(&candidates, strategy, &self.usage.snapshot())
    }

    /// Runs a `working` task through ranking and failover.
    ///
    /// Returns the task in its resulting state: `completed` with an agent
    /// message and a completion artifact, `failed` with a status message
    /// naming every attempted model and its failure class, or `canceled` if
    /// [`TaskOrchestrator::cancel`] won the race.
    ///
    /// # Errors
    /// * `TransitionError` - If the task is not `working`
    /// * `OrchestrationError::NotRunnable` - If the task is already being
    ///   processed, or was not started or resumed by this orchestrator
    /// * `StoreError` - If persistence fails
    pub async fn process(&self, task_id: &str, strategy: SelectionStrategy) -> Result<Task> {
        let (task, run_id, token) = {
            let (_guard, task) = self.lock_existing(task_id).await?;
            require_state(&task, TaskState::Working, TaskState::Completed)?;
            let (run_id, token) = self.claim_run(task_id)?;
            (task, run_id, token)
        };

        let request = self.build_request(&task);
        let ranked = match self.rank(strategy) {
            Ok(ranked) => ranked,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "No candidates for task");
                return self.finish_failed(task_id, run_id, &err.to_string()).await;
            }
        };
        let candidates: Vec<_> = ranked.into_iter().map(|s| s.model).collect();
        debug!(task_id = %task_id, strategy = %strategy, candidates = candidates.len(), "Executing task");

        let store = &self.store;
        let still_working = || async move {
            match store.get(task_id).await {
                Ok(task) => task.state() == TaskState::Working,
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "Could not re-read task state");
                    false
                }
            }
        };
        let result = self.executor.execute_while(&candidates, &request, &token, still_working).await;

        match result {
            Ok(outcome) => self.finish_completed(task_id, run_id, outcome).await,
            Err(FailoverError::Cancelled { .. }) => {
                info!(task_id = %task_id, "Task processing stopped by cancellation");
                let _guard = self.lock_task(task_id).await;
                let task = self.store.get(task_id).await?;
                self.settle(&task, run_id);
                Ok(task)
            }
            Err(err) => self.finish_failed(task_id, run_id, &err.to_string()).await,
        }
    }

    /// [`TaskOrchestrator::start`] followed by [`TaskOrchestrator::process`].
    ///
    /// A task canceled between the two steps is returned as `canceled`, the
    /// same as one canceled while a provider call is in flight.
    ///
    /// # Errors
    /// Same as `start` and `process`.
    pub async fn run(&self, task_id: &str, strategy: SelectionStrategy) -> Result<Task> {
        let task = self.start(task_id).await?;
        if task.state() != TaskState::Working {
            return Ok(task);
        }
        match self.process(task_id, strategy).await {
            Err(err) if err.as_transition().is_some() => {
                let task = self.store.get(task_id).await?;
                if task.state() == TaskState::Canceled {
                    info!(task_id = %task_id, "Task canceled before processing");
                    self.forget(task_id);
                    Ok(task)
                } else {
                    Err(err)
                }
            }
            other => other,
        }
    }

    /// Cancels a non-terminal task and abandons any in-flight attempt.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - If no task has this id
    /// * `TransitionError::TaskAlreadyTerminal` - If the task already finished
    pub async fn cancel(&self, task_id: &str) -> Result<Task> {
        let (_guard, _) = self.lock_existing(task_id).await?;
        let task = self
            .store
            .update_status(task_id, TaskState::Canceled, Some(CANCELED_BY_REQUEST.to_string()))
            .await?;
        let run = self.runs.lock().unwrap_or_else(PoisonError::into_inner).remove(task_id);
        if let Some(run) = run {
            run.token.cancel();
        }
        self.forget(task_id);
        info!(task_id = %task_id, "Task canceled");
        Ok(task)
    }

    /// Pauses a `working` task to ask the caller for more input.
    ///
    /// # Errors
    /// * `TransitionError` - If the task is not `working`
    pub async fn request_input(&self, task_id: &str, prompt: impl Into<String> + Send) -> Result<Task> {
        let prompt = prompt.into();
        let (_guard, _) = self.lock_existing(task_id).await?;
        self.store
            .update_status(task_id, TaskState::InputRequired, Some(prompt.clone()))
            .await?;
        self.store.append_message(task_id, Message::text(Role::Agent, prompt)).await?;
        info!(task_id = %task_id, "Task waiting for input");
        Ok(self.store.get(task_id).await?)
    }

    /// Resumes a task waiting on input or credentials.
    ///
    /// The message is appended and the task returns to `working`; call
    /// [`TaskOrchestrator::process`] to continue.
    ///
    /// # Errors
    /// * `TransitionError::IllegalTransition` - Unless the task is `input-required` or `auth-required`
    pub async fn provide_input(&self, task_id: &str, message: Message) -> Result<Task> {
        let (_guard, task) = self.lock_existing(task_id).await?;
        if !matches!(task.state(), TaskState::InputRequired | TaskState::AuthRequired) {
            return Err(transition_error(task.state(), TaskState::Working).into());
        }
        self.store.update_status(task_id, TaskState::Working, None).await?;
        self.store.append_message(task_id, message).await?;
        self.open_run(task_id);
        info!(task_id = %task_id, "Task resumed with input");
        Ok(self.store.get(task_id).await?)
    }

    /// Pauses a `working` task until credentials are supplied.
    ///
    /// # Errors
    /// * `TransitionError` - If the task is not `working`
    pub async fn request_auth(&self, task_id: &str, reason: impl Into<String> + Send) -> Result<Task> {
        let (_guard, _) = self.lock_existing(task_id).await?;
        let task = self
            .store
            .update_status(task_id, TaskState::AuthRequired, Some(reason.into()))
            .await?;
        info!(task_id = %task_id, "Task waiting for credentials");
        Ok(task)
    }

    fn build_request(&self, task: &Task) -> ProviderRequest {
        let mut messages = Vec::with_capacity(task.history.len() + 1);
        if let Some(system) = &self.settings.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        for message in task.history.iter().filter(|m| m.has_text()) {
            let role = match message.role {
                Role::User => ChatRole::User,
                Role::Agent => ChatRole::Assistant,
            };
            messages.push(ChatMessage::new(role, message.text_content()));
        }
        ProviderRequest::new(messages)
            .with_max_tokens(self.settings.max_tokens)
            .with_temperature(self.settings.temperature)
    }

    async fn finish_completed(&self, task_id: &str, run_id: u64, outcome: FailoverOutcome) -> Result<Task> {
        let _guard = self.lock_task(task_id).await;
        let current = self.store.get(task_id).await?;
        if current.state() != TaskState::Working {
            info!(task_id = %task_id, state = %current.state(), "Discarding result for task that left working");
            self.settle(&current, run_id);
            return Ok(current);
        }

        let model = &outcome.model;
        let attempts = outcome.attempt_count();
        let response = outcome.response;
        let metadata = ArtifactMetadata::new(ArtifactKind::Completion {
            model_id: model.id.to_string(),
            provider: model.id.provider.to_string(),
            duration_ms: outcome.duration.as_millis() as u64,
            completion_tokens: response.completion_tokens,
            attempts,
        })
        .with_extra("raw_metadata", response.raw_metadata);

        self.store
            .append_message(task_id, Message::text(Role::Agent, response.content.clone()))
            .await?;
        self.store
            .append_artifact(task_id, Artifact::new(vec![Part::text(response.content)], metadata))
            .await?;
        let task = self.store.update_status(task_id, TaskState::Completed, None).await?;
        self.forget(task_id);
        info!(task_id = %task_id, model_id = %model.id, "Task completed");
        Ok(task)
    }

    async fn finish_failed(&self, task_id: &str, run_id: u64, reason: &str) -> Result<Task> {
        let _guard = self.lock_task(task_id).await;
        let current = self.store.get(task_id).await?;
        if current.state() != TaskState::Working {
            self.settle(&current, run_id);
            return Ok(current);
        }
        let task = self
            .store
            .update_status(task_id, TaskState::Failed, Some(reason.to_string()))
            .await?;
        self.forget(task_id);
        warn!(task_id = %task_id, reason = %reason, "Task failed");
        Ok(task)
    }

    async fn lock_task(&self, task_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(task_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    // Locks the task and loads it; unknown ids leave no lock entry behind.
    async fn lock_existing(&self, task_id: &str) -> Result<(OwnedMutexGuard<()>, Task)> {
        let guard = self.lock_task(task_id).await;
        match self.store.get(task_id).await {
            Ok(task) => Ok((guard, task)),
            Err(err) => {
                drop(guard);
                if matches!(err, StoreError::NotFound(_)) {
                    self.locks.lock().unwrap_or_else(PoisonError::into_inner).remove(task_id);
                }
                Err(err.into())
            }
        }
    }

    fn open_run(&self, task_id: &str) {
        let run = TaskRun {
            id: self.next_run.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            claimed: false,
        };
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).insert(task_id.to_string(), run);
    }

    fn claim_run(&self, task_id: &str) -> Result<(u64, CancellationToken)> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        match runs.get_mut(task_id) {
            None => Err(OrchestrationError::NotRunnable {
                task_id: task_id.to_string(),
                reason: "no open run",
            }),
            Some(run) if run.claimed => Err(OrchestrationError::NotRunnable {
                task_id: task_id.to_string(),
                reason: "already being processed",
            }),
            Some(run) => {
                run.claimed = true;
                Ok((run.id, run.token.clone()))
            }
        }
    }

    // Ends the run `run_id` after it stopped without publishing. A newer run
    // opened by `provide_input` in the meantime is left alone.
    fn settle(&self, task: &Task, run_id: u64) {
        if task.state().is_terminal() {
            self.forget(&task.id);
            return;
        }
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.get(&task.id).is_some_and(|run| run.id == run_id) {
            runs.remove(&task.id);
        }
    }

    // Drops bookkeeping for a task that will not be processed again.
    fn forget(&self, task_id: &str) {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).remove(task_id);
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).remove(task_id);
    }
}

fn transition_error(from: TaskState, to: TaskState) -> TransitionError {
    if from.is_terminal() {
        TransitionError::TaskAlreadyTerminal { state: from }
    } else {
        TransitionError::IllegalTransition { from, to }
    }
}

fn require_state(task: &Task, expected: TaskState, next: TaskState) -> std::result::Result<(), OrchestrationError> {
    if task.state() == expected {
        Ok(())
    } else {
        Err(transition_error(task.state(), next).into())
    }
}
