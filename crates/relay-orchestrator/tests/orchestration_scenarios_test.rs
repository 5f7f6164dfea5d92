//! End-to-end task runs against scripted providers.

use async_trait::async_trait;
use relay_abstraction::{ProviderClient, ProviderError, ProviderKind};
use relay_core::{
    Artifact, ArtifactKind, MemoryTaskStore, Message, SqliteTaskStore, StoreResult, Task, TaskId,
    TaskState, TaskStore,
};
use relay_models::{MockProvider, MockReply};
use relay_orchestrator::{
    FailoverExecutor, FailoverSettings, ModelCatalog, ModelDescriptor, ModelId, ModelTier,
    OrchestratorSettings, ProviderSet, SelectionStrategy, TaskOrchestrator, TaskWorkerPool,
    UsageTracker,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Memory store with hooks for forcing interleavings.
///
/// When `pause_next_working_read` is set, the next `get` that reads a
/// `working` task parks until `resume` is notified. When
/// `cancel_after_start` is set, the task is canceled behind the
/// orchestrator's back right after it moves to `working`.
#[derive(Default)]
struct HookedStore {
    inner: MemoryTaskStore,
    pause_next_working_read: AtomicBool,
    cancel_after_start: AtomicBool,
    paused: Notify,
    resume: Notify,
}

#[async_trait]
impl TaskStore for HookedStore {
    async fn create(&self, task: Task) -> StoreResult<TaskId> {
        self.inner.create(task).await
    }

    async fn get(&self, id: &str) -> StoreResult<Task> {
        let task = self.inner.get(id).await?;
        if task.state() == TaskState::Working && self.pause_next_working_read.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.resume.notified().await;
        }
        Ok(task)
    }

    async fn update_status(&self, id: &str, state: TaskState, message: Option<String>) -> StoreResult<Task> {
        let task = self.inner.update_status(id, state, message).await?;
        if state == TaskState::Working && self.cancel_after_start.swap(false, Ordering::SeqCst) {
            self.inner.update_status(id, TaskState::Canceled, Some("canceled elsewhere".into())).await?;
        }
        Ok(task)
    }

    async fn append_message(&self, id: &str, message: Message) -> StoreResult<()> {
        self.inner.append_message(id, message).await
    }

    async fn append_artifact(&self, id: &str, artifact: Artifact) -> StoreResult<()> {
        self.inner.append_artifact(id, artifact).await
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        self.inner.list().await
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.inner.delete(id).await
    }
}

fn free_model(name: &str, quality: u8) -> ModelDescriptor {
    ModelDescriptor::new(
        ModelId::new(ProviderKind::OpenRouter, name),
        32_768,
        0.0,
        quality,
        20,
        ModelTier::Free,
        true,
    )
}

fn orchestrator(
    mock: &Arc<MockProvider>,
    models: Vec<ModelDescriptor>,
    settings: FailoverSettings,
    store: Arc<dyn TaskStore>,
) -> TaskOrchestrator {
    let catalog = Arc::new(ModelCatalog::new(models, Duration::from_secs(300)));
    let usage = Arc::new(UsageTracker::new());
    let providers: ProviderSet =
        [Arc::clone(mock) as Arc<dyn ProviderClient>].into_iter().collect();
    let executor = FailoverExecutor::new(providers, Arc::clone(&usage), settings)
        .with_catalog(Arc::clone(&catalog));
    TaskOrchestrator::new(store, catalog, usage, executor, OrchestratorSettings::default())
}

#[tokio::test]
async fn empty_responses_fall_through_in_rank_order() {
    let mock = Arc::new(
        MockProvider::new(ProviderKind::OpenRouter)
            .with_script("free-a", vec![MockReply::Empty])
            .with_script("free-b", vec![MockReply::Content("   \n".into())])
            .with_script("free-c", vec![MockReply::Content("third time lucky".into())]),
    );
    let models = vec![free_model("free-c", 20), free_model("free-a", 30), free_model("free-b", 25)];
    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
    let orch = orchestrator(&mock, models, FailoverSettings::default(), store);

    let task = orch.submit_text("summarize the release notes").await.unwrap();
    let task = orch.run(&task.id, SelectionStrategy::Cost).await.unwrap();

    assert_eq!(mock.calls(), vec!["free-a", "free-b", "free-c"]);
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.history.last().unwrap().text_content(), "third time lucky");
    assert_eq!(task.artifacts.len(), 1);
    match &task.artifacts[0].metadata.kind {
        ArtifactKind::Completion { model_id, attempts, .. } => {
            assert_eq!(model_id, "openrouter:free-c");
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected artifact kind {other:?}"),
    }

    let usage = orch.usage().snapshot();
    let a = usage.get(&ModelId::new(ProviderKind::OpenRouter, "free-a"));
    let c = usage.get(&ModelId::new(ProviderKind::OpenRouter, "free-c"));
    assert_eq!((a.recent_request_count, a.recent_failure_count, a.success_count), (1, 1, 0));
    assert_eq!((c.recent_request_count, c.recent_failure_count, c.success_count), (1, 0, 1));
}

#[tokio::test(start_paused = true)]
async fn timeouts_exhaust_fallbacks_and_fail_the_task() {
    let slow = || MockReply::delayed(Duration::from_secs(60), MockReply::Content("late".into()));
    let mock = Arc::new(
        MockProvider::new(ProviderKind::OpenRouter)
            .with_script("free-a", vec![slow()])
            .with_script("free-b", vec![slow()])
            .with_script("free-c", vec![slow()]),
    );
    let models = vec![free_model("free-a", 30), free_model("free-b", 25), free_model("free-c", 20)];
    let settings = FailoverSettings { max_fallbacks: 2, attempt_timeout: Duration::from_secs(5) };
    let orch = orchestrator(&mock, models, settings, Arc::new(MemoryTaskStore::new()));

    let task = orch.submit_text("hello").await.unwrap();
    let task = orch.run(&task.id, SelectionStrategy::Cost).await.unwrap();

    assert_eq!(task.state(), TaskState::Failed);
    assert!(task.artifacts.is_empty());
    let message = task.status.message.clone().unwrap();
    assert_eq!(
        message,
        "All fallbacks exhausted after 2 attempts: openrouter:free-a (Timeout), openrouter:free-b (Timeout)"
    );
    assert_eq!(mock.calls(), vec!["free-a", "free-b"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_in_flight_call_leaves_task_canceled() {
    let mock = Arc::new(MockProvider::new(ProviderKind::OpenRouter).with_script(
        "free-a",
        vec![MockReply::delayed(Duration::from_secs(30), MockReply::Content("too late".into()))],
    ));
    let orch = Arc::new(orchestrator(
        &mock,
        vec![free_model("free-a", 30), free_model("free-b", 10)],
        FailoverSettings::default(),
        Arc::new(MemoryTaskStore::new()),
    ));

    let task = orch.submit_text("long job").await.unwrap();
    let runner = {
        let orch = Arc::clone(&orch);
        let id = task.id.clone();
        tokio::spawn(async move { orch.run(&id, SelectionStrategy::Quality).await })
    };

    while mock.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let canceled = orch.cancel(&task.id).await.unwrap();
    assert_eq!(canceled.state(), TaskState::Canceled);

    let finished = runner.await.unwrap().unwrap();
    assert_eq!(finished.state(), TaskState::Canceled);

    let stored = orch.get(&task.id).await.unwrap();
    assert_eq!(stored.state(), TaskState::Canceled);
    assert!(stored.artifacts.is_empty());
    assert_eq!(stored.history.len(), 1);
    assert_eq!(mock.calls(), vec!["free-a"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_racing_the_working_check_stops_the_fallback_chain() {
    let empty = || MockReply::delayed(Duration::from_secs(30), MockReply::Empty);
    let mock = Arc::new(
        MockProvider::new(ProviderKind::OpenRouter)
            .with_script("free-a", vec![empty()])
            .with_script("free-b", vec![empty()]),
    );
    let store = Arc::new(HookedStore::default());
    let orch = Arc::new(orchestrator(
        &mock,
        vec![free_model("free-a", 30), free_model("free-b", 25)],
        FailoverSettings::default(),
        Arc::clone(&store) as Arc<dyn TaskStore>,
    ));
    let task = orch.submit_text("race me").await.unwrap();
    orch.start(&task.id).await.unwrap();

    store.pause_next_working_read.store(true, Ordering::SeqCst);
    let processing = {
        let orch = Arc::clone(&orch);
        let id = task.id.clone();
        tokio::spawn(async move { orch.process(&id, SelectionStrategy::Cost).await })
    };
    store.paused.notified().await;

    let canceling = {
        let orch = Arc::clone(&orch);
        let id = task.id.clone();
        tokio::spawn(async move { orch.cancel(&id).await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    store.resume.notify_one();

    let canceled = canceling.await.unwrap().unwrap();
    assert_eq!(canceled.state(), TaskState::Canceled);
    let processed = processing.await.unwrap().unwrap();
    assert_eq!(processed.state(), TaskState::Canceled);

    let calls = mock.calls();
    assert!(calls.len() <= 1, "fallbacks ran after cancel: {calls:?}");
    assert!(!calls.contains(&"free-b".to_string()));
    assert!(orch.get(&task.id).await.unwrap().artifacts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_written_to_the_store_stops_before_next_attempt() {
    let mock = Arc::new(
        MockProvider::new(ProviderKind::OpenRouter)
            .with_script("free-a", vec![MockReply::delayed(Duration::from_secs(30), MockReply::Empty)])
            .with_script("free-b", vec![MockReply::Content("should not run".into())]),
    );
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let orch = Arc::new(orchestrator(
        &mock,
        vec![free_model("free-a", 30), free_model("free-b", 25)],
        FailoverSettings::default(),
        Arc::clone(&store),
    ));
    let task = orch.submit_text("shared database").await.unwrap();
    let runner = {
        let orch = Arc::clone(&orch);
        let id = task.id.clone();
        tokio::spawn(async move { orch.run(&id, SelectionStrategy::Cost).await })
    };

    while mock.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Another process sharing the database cancels without touching this orchestrator.
    store.update_status(&task.id, TaskState::Canceled, Some("canceled elsewhere".into())).await.unwrap();

    let finished = runner.await.unwrap().unwrap();
    assert_eq!(finished.state(), TaskState::Canceled);
    assert_eq!(finished.status.message.as_deref(), Some("canceled elsewhere"));
    assert!(finished.artifacts.is_empty());
    assert_eq!(mock.calls(), vec!["free-a"]);
}

#[tokio::test(start_paused = true)]
async fn late_answer_for_a_task_canceled_elsewhere_is_discarded() {
    let mock = Arc::new(MockProvider::new(ProviderKind::OpenRouter).with_script(
        "free-a",
        vec![MockReply::delayed(Duration::from_secs(30), MockReply::Content("late answer".into()))],
    ));
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let orch = Arc::new(orchestrator(
        &mock,
        vec![free_model("free-a", 30)],
        FailoverSettings::default(),
        Arc::clone(&store),
    ));
    let task = orch.submit_text("too slow").await.unwrap();
    let runner = {
        let orch = Arc::clone(&orch);
        let id = task.id.clone();
        tokio::spawn(async move { orch.run(&id, SelectionStrategy::Cost).await })
    };

    while mock.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    store.update_status(&task.id, TaskState::Canceled, None).await.unwrap();

    let finished = runner.await.unwrap().unwrap();
    assert_eq!(finished.state(), TaskState::Canceled);
    assert!(finished.artifacts.is_empty());
    assert_eq!(finished.history.len(), 1);
    assert_eq!(orch.usage().snapshot().get(&ModelId::new(ProviderKind::OpenRouter, "free-a")).success_count, 1);
}

#[tokio::test]
async fn run_returns_task_canceled_between_start_and_process() {
    let mock = Arc::new(MockProvider::new(ProviderKind::OpenRouter));
    let store = Arc::new(HookedStore::default());
    store.cancel_after_start.store(true, Ordering::SeqCst);
    let orch = orchestrator(
        &mock,
        vec![free_model("free-a", 30)],
        FailoverSettings::default(),
        Arc::clone(&store) as Arc<dyn TaskStore>,
    );

    let task = orch.submit_text("never mind").await.unwrap();
    let task = orch.run(&task.id, SelectionStrategy::Cost).await.unwrap();

    assert_eq!(task.state(), TaskState::Canceled);
    assert!(task.artifacts.is_empty());
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn auth_failure_parks_model_and_next_candidate_answers() {
    let mock = Arc::new(
        MockProvider::new(ProviderKind::OpenRouter)
            .with_script("free-a", vec![MockReply::Error(ProviderError::AuthError("401".into()))])
            .with_script("free-b", vec![MockReply::Content("ok".into())]),
    );
    let orch = orchestrator(
        &mock,
        vec![free_model("free-a", 30), free_model("free-b", 25)],
        FailoverSettings::default(),
        Arc::new(MemoryTaskStore::new()),
    );

    let task = orch.submit_text("first").await.unwrap();
    let task = orch.run(&task.id, SelectionStrategy::Cost).await.unwrap();
    assert_eq!(task.state(), TaskState::Completed);

    let parked = ModelId::new(ProviderKind::OpenRouter, "free-a");
    assert!(orch.catalog().is_stale(&parked));
    let ranked = orch.rank(SelectionStrategy::Cost).unwrap();
    assert!(ranked.iter().all(|s| s.model.id != parked));
}

#[tokio::test]
async fn worker_pool_runs_every_task() {
    let mock = Arc::new(MockProvider::new(ProviderKind::OpenRouter));
    let orch = Arc::new(orchestrator(
        &mock,
        vec![free_model("free-a", 30), free_model("free-b", 25)],
        FailoverSettings::default(),
        Arc::new(MemoryTaskStore::new()),
    ));
    let pool = TaskWorkerPool::new(Arc::clone(&orch), 2);

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(orch.submit_text(format!("job {i}")).await.unwrap().id);
    }

    let results = pool.run_all(ids.clone(), SelectionStrategy::Balanced).await;
    assert_eq!(results.len(), 5);
    for (id, result) in ids.iter().zip(results) {
        let task = result.unwrap();
        assert_eq!(&task.id, id);
        assert_eq!(task.state(), TaskState::Completed);
    }
    assert_eq!(pool.available_permits(), 2);
    assert_eq!(mock.calls().len(), 5);
}
