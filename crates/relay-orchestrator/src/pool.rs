//! Bounded pool of task workers.

use futures::future::join_all;
use relay_core::{Task, TaskId};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{OrchestrationError, Result};
use crate::orchestrator::TaskOrchestrator;
use crate::routing::SelectionStrategy;

/// Runs tasks concurrently, at most `max_concurrent` at a time.
#[derive(Debug, Clone)]
pub struct TaskWorkerPool {
    orchestrator: Arc<TaskOrchestrator>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskWorkerPool {
    /// Creates a pool over `orchestrator`.
    ///
    /// # Arguments
    /// * `orchestrator` - Shared orchestrator
    /// * `max_concurrent` - Maximum tasks in flight; clamped to at least 1
    pub fn new(orchestrator: Arc<TaskOrchestrator>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self { orchestrator, semaphore: Arc::new(Semaphore::new(max_concurrent)), max_concurrent }
    }

    /// The orchestrator workers run against.
    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    /// Configured concurrency bound.
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Workers not currently running a task.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Spawns a worker that runs `task_id` once a permit is free.
    pub fn spawn(&self, task_id: TaskId, strategy: SelectionStrategy) -> JoinHandle<Result<Task>> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| OrchestrationError::Worker(format!("worker pool closed: {e}")))?;
            debug!(task_id = %task_id, "Worker picked up task");
            orchestrator.run(&task_id, strategy).await
        })
    }

    /// Runs every task and waits for all of them, preserving input order.
    pub async fn run_all(&self, task_ids: Vec<TaskId>, strategy: SelectionStrategy) -> Vec<Result<Task>> {
        let handles: Vec<_> = task_ids.into_iter().map(|id| self.spawn(id, strategy)).collect();
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    error!(error = %e, "Worker task did not finish");
                    Err(OrchestrationError::Worker(e.to_string()))
                })
            })
            .collect()
    }

    /// Stops handing out permits; queued workers fail with `Worker`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
