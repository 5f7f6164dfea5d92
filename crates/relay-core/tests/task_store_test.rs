//! Behaviour shared by every `TaskStore` backend.

use relay_core::{
    Artifact, ArtifactKind, ArtifactMetadata, FileContent, MemoryTaskStore, Message, Part, Role,
    SqliteTaskStore, StoreError, Task, TaskState, TaskStatus, TaskStore, TransitionError,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn backends() -> (TempDir, Vec<(&'static str, Arc<dyn TaskStore>)>) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteTaskStore::open(dir.path().join("tasks.db")).unwrap();
    let stores: Vec<(&'static str, Arc<dyn TaskStore>)> =
        vec![("memory", Arc::new(MemoryTaskStore::new())), ("sqlite", Arc::new(sqlite))];
    (dir, stores)
}

fn completion_artifact(attempts: u32) -> Artifact {
    Artifact::new(
        vec![Part::text("final answer")],
        ArtifactMetadata::new(ArtifactKind::Completion {
            model_id: "openrouter:deepseek/deepseek-chat-v3-0324:free".into(),
            provider: "openrouter".into(),
            duration_ms: 1_250,
            completion_tokens: 17,
            attempts,
        })
        .with_extra("finish_reason", json!("stop")),
    )
}

#[tokio::test]
async fn persisted_shape_round_trip_preserves_order_and_content() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let task = Task::builder()
            .context_id("ctx-roundtrip")
            .message(Message::text(Role::User, "draft a haiku"))
            .build();
        let id = store.create(task).await.unwrap();

        let attachment = Message::new(
            Role::User,
            vec![
                Part::text("use this"),
                Part::File {
                    file: FileContent {
                        name: Some("style.txt".into()),
                        mime_type: Some("text/plain".into()),
                        uri: None,
                        bytes: Some("aGVsbG8=".into()),
                    },
                },
            ],
        );
        let reply = Message::new(Role::Agent, vec![Part::Data { data: json!({"lines": 3}) }]);
        store.append_message(&id, attachment.clone()).await.unwrap();
        store.append_message(&id, reply.clone()).await.unwrap();
        store.append_artifact(&id, completion_artifact(1)).await.unwrap();
        store.append_artifact(&id, completion_artifact(2)).await.unwrap();

        let stored = store.get(&id).await.unwrap();
        let encoded = serde_json::to_string(&stored).unwrap();
        let decoded: Task = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, stored, "{name}: json round trip");

        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["kind"], "task", "{name}");
        assert_eq!(value["context_id"], "ctx-roundtrip", "{name}");
        assert_eq!(value["status"]["state"], "submitted", "{name}");
        assert_eq!(value["history"].as_array().unwrap().len(), 3, "{name}");
        assert_eq!(value["history"][1]["message_id"], attachment.message_id.as_str(), "{name}");
        assert_eq!(value["history"][2]["message_id"], reply.message_id.as_str(), "{name}");
        assert_eq!(value["artifacts"][0]["metadata"]["attempts"], 1, "{name}");
        assert_eq!(value["artifacts"][1]["metadata"]["attempts"], 2, "{name}");
        assert_eq!(value["artifacts"][1]["metadata"]["artifact_type"], "completion", "{name}");
    }
}

#[tokio::test]
async fn reappending_same_ids_is_a_no_op() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let id = store.create(Task::new()).await.unwrap();
        let msg = Message::text(Role::User, "once");
        let artifact = completion_artifact(1);

        for _ in 0..3 {
            store.append_message(&id, msg.clone()).await.unwrap();
            store.append_artifact(&id, artifact.clone()).await.unwrap();
        }

        let task = store.get(&id).await.unwrap();
        assert_eq!(task.history.len(), 1, "{name}");
        assert_eq!(task.artifacts.len(), 1, "{name}");
    }
}

#[tokio::test]
async fn concurrent_appends_are_both_recorded() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let id = store.create(Task::new()).await.unwrap();

        let a = Message::text(Role::User, "from worker a");
        let b = Message::text(Role::Agent, "from worker b");
        let (ra, rb) = tokio::join!(
            {
                let store = Arc::clone(&store);
                let id = id.clone();
                let a = a.clone();
                tokio::spawn(async move { store.append_message(&id, a).await })
            },
            {
                let store = Arc::clone(&store);
                let id = id.clone();
                let b = b.clone();
                tokio::spawn(async move { store.append_message(&id, b).await })
            }
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let task = store.get(&id).await.unwrap();
        assert_eq!(task.history.len(), 2, "{name}");
        assert!(task.has_message(&a.message_id), "{name}");
        assert!(task.has_message(&b.message_id), "{name}");
    }
}

#[tokio::test]
async fn many_concurrent_appends_keep_every_message() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let id = store.create(Task::new()).await.unwrap();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move {
                    store.append_message(&id, Message::text(Role::User, format!("msg {i}"))).await
                })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }
        assert_eq!(store.get(&id).await.unwrap().history.len(), 16, "{name}");
    }
}

#[tokio::test]
async fn transitions_follow_the_lifecycle_graph() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let id = store.create(Task::new()).await.unwrap();
        for state in [TaskState::Working, TaskState::InputRequired, TaskState::Working] {
            store.update_status(&id, state, None).await.unwrap();
        }
        let err = store.update_status(&id, TaskState::Rejected, None).await.unwrap_err();
        assert!(
            matches!(
                err,
                StoreError::Transition(TransitionError::IllegalTransition {
                    from: TaskState::Working,
                    to: TaskState::Rejected
                })
            ),
            "{name}: {err}"
        );

        let done = store.update_status(&id, TaskState::Completed, Some("ok".into())).await.unwrap();
        assert!(done.completed_at.is_some(), "{name}");

        let err = store.update_status(&id, TaskState::Canceled, None).await.unwrap_err();
        assert!(
            matches!(
                err,
                StoreError::Transition(TransitionError::TaskAlreadyTerminal {
                    state: TaskState::Completed
                })
            ),
            "{name}: {err}"
        );
        assert_eq!(store.get(&id).await.unwrap().state(), TaskState::Completed, "{name}");
    }
}

#[tokio::test]
async fn create_only_accepts_fresh_submitted_tasks() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut finished = Task::builder().message(Message::text(Role::User, "skip ahead")).build();
        finished.status = TaskStatus::new(TaskState::Completed, Some("done".into()));
        let err = store.create(finished.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTask(_)), "{name}: {err}");
        assert!(matches!(store.get(&finished.id).await, Err(StoreError::NotFound(_))), "{name}");

        let mut with_artifact = Task::new();
        with_artifact.artifacts.push(completion_artifact(1));
        let err = store.create(with_artifact).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTask(_)), "{name}: {err}");

        let mut started = Task::new();
        started.started_at = Some(chrono::Utc::now());
        let err = store.create(started).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTask(_)), "{name}: {err}");

        let id = store.create(Task::new()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().state(), TaskState::Submitted, "{name}");
    }
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.db");
    let id = {
        let store = SqliteTaskStore::open(&path).unwrap();
        let id = store
            .create(Task::builder().message(Message::text(Role::User, "persist me")).build())
            .await
            .unwrap();
        store.update_status(&id, TaskState::Working, None).await.unwrap();
        id
    };

    let reopened = SqliteTaskStore::open(&path).unwrap();
    let task = reopened.get(&id).await.unwrap();
    assert_eq!(task.state(), TaskState::Working);
    assert_eq!(task.history[0].text_content(), "persist me");
}
