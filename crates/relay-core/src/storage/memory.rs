//! In-memory task store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{StoreError, StoreResult, TaskStore};
use crate::lifecycle::TaskStateMachine;
use crate::models::{Artifact, Message, Task, TaskId, TaskState};

/// Task store that keeps everything in process memory.
///
/// The map itself is guarded by a short-lived `RwLock`; each task has its own
/// async mutex, so writers for different tasks never contend.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<Task>>>>,
}

impl fmt::Debug for MemoryTaskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.tasks.read().map_or(0, |t| t.len());
        f.debug_struct("MemoryTaskStore").field("task_count", &count).finish()
    }
}

impl MemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> StoreResult<Arc<Mutex<Task>>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: Task) -> StoreResult<TaskId> {
        task.validate_new()?;
        let id = task.id.clone();
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        tasks.insert(id.clone(), Arc::new(Mutex::new(task)));
        info!(task_id = %id, "Created task");
        Ok(id)
    }

    async fn get(&self, id: &str) -> StoreResult<Task> {
        let entry = self.entry(id)?;
        let task = entry.lock().await.clone();
        Ok(task)
    }

    async fn update_status(
        &self,
        id: &str,
        state: TaskState,
        message: Option<String>,
    ) -> StoreResult<Task> {
        let entry = self.entry(id)?;
        let mut task = entry.lock().await;
        TaskStateMachine::apply(&mut task, state, message)?;
        Ok(task.clone())
    }

    async fn append_message(&self, id: &str, message: Message) -> StoreResult<()> {
        let entry = self.entry(id)?;
        let mut task = entry.lock().await;
        let message_id = message.message_id.clone();
        if !task.push_message(message) {
            debug!(task_id = %id, message_id = %message_id, "Message already recorded");
        }
        Ok(())
    }

    async fn append_artifact(&self, id: &str, artifact: Artifact) -> StoreResult<()> {
        let entry = self.entry(id)?;
        let mut task = entry.lock().await;
        let artifact_id = artifact.artifact_id.clone();
        if !task.push_artifact(artifact) {
            debug!(task_id = %id, artifact_id = %artifact_id, "Artifact already recorded");
        }
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        let entries: Vec<Arc<Mutex<Task>>> =
            self.tasks.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.lock().await.clone());
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let removed = self.tasks.write().unwrap_or_else(PoisonError::into_inner).remove(id);
        match removed {
            Some(_) => {
                info!(task_id = %id, "Deleted task");
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TransitionError;
    use crate::models::Role;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryTaskStore::new();
        let task = Task::builder().message(Message::text(Role::User, "hello")).build();
        let id = store.create(task.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_refused() {
        let store = MemoryTaskStore::new();
        let task = Task::new();
        store.create(task.clone()).await.unwrap();
        assert!(matches!(store.create(task).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let store = MemoryTaskStore::new();
        assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.append_message("nope", Message::text(Role::User, "x")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update_status("nope", TaskState::Working, None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_illegal_transition_keeps_state() {
        let store = MemoryTaskStore::new();
        let id = store.create(Task::new()).await.unwrap();
        let err = store.update_status(&id, TaskState::Completed, None).await.unwrap_err();
        assert_eq!(
            err.as_transition(),
            Some(&TransitionError::IllegalTransition {
                from: TaskState::Submitted,
                to: TaskState::Completed
            })
        );
        assert_eq!(store.get(&id).await.unwrap().state(), TaskState::Submitted);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = MemoryTaskStore::new();
        let a = store.create(Task::new()).await.unwrap();
        let b = store.create(Task::new()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
        store.delete(&a).await.unwrap();
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
        assert!(matches!(store.delete(&a).await, Err(StoreError::NotFound(_))));
    }
}
