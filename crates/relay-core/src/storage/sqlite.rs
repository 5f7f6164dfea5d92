//! SQLite task store.
//!
//! Tasks live in one row each; history and artifacts are append-only logs
//! keyed by `(task_id, seq)` with a unique `(task_id, message_id)` /
//! `(task_id, artifact_id)` constraint, which is what makes appends idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{StoreError, StoreResult, TaskStore};
use crate::lifecycle::TaskStateMachine;
use crate::models::{Artifact, Message, Task, TaskId, TaskKind, TaskState, TaskStatus};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        context_id TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'task',
        state TEXT NOT NULL,
        status_message TEXT,
        status_timestamp TEXT NOT NULL,
        assigned_agent TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    );

    CREATE TABLE IF NOT EXISTS task_messages (
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        seq INTEGER NOT NULL,
        message_id TEXT NOT NULL,
        message_json TEXT NOT NULL,
        PRIMARY KEY (task_id, seq),
        UNIQUE (task_id, message_id)
    );

    CREATE TABLE IF NOT EXISTS task_artifacts (
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        seq INTEGER NOT NULL,
        artifact_id TEXT NOT NULL,
        artifact_json TEXT NOT NULL,
        PRIMARY KEY (task_id, seq),
        UNIQUE (task_id, artifact_id)
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);
"#;

const TASK_COLUMNS: &str = "id, context_id, state, status_message, status_timestamp, \
     assigned_agent, priority, created_at, started_at, completed_at";

/// Task store backed by a SQLite database.
///
/// A single connection is shared behind a mutex; every mutation runs in its
/// own transaction.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTaskStore").finish_non_exhaustive()
    }
}

impl SqliteTaskStore {
    /// Opens (or creates) a database file and initializes the schema.
    ///
    /// # Errors
    /// * `StoreError::Sqlite` - If the database cannot be opened or migrated
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened task database");
        Self::with_connection(conn)
    }

    /// Opens an in-memory database.
    ///
    /// # Errors
    /// * `StoreError::Sqlite` - If schema creation fails
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parses a JSON column into a deserializable type.
fn parse_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: String = row.get(idx)?;
    serde_json::from_str(&json_str).map_err(|_| invalid_column(idx, column_name))
}

/// Parses an RFC3339 timestamp column.
fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid_column(idx, column_name))
}

fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| invalid_column(idx, column_name))
    })
    .transpose()
}

fn parse_state(row: &Row, idx: usize) -> rusqlite::Result<TaskState> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| invalid_column(idx, "state"))
}

fn invalid_column(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), rusqlite::types::Type::Text)
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        context_id: row.get(1)?,
        kind: TaskKind::Task,
        status: TaskStatus {
            state: parse_state(row, 2)?,
            message: row.get(3)?,
            timestamp: parse_timestamp(row, 4, "status_timestamp")?,
        },
        history: Vec::new(),
        artifacts: Vec::new(),
        assigned_agent: row.get(5)?,
        priority: row.get(6)?,
        created_at: parse_timestamp(row, 7, "created_at")?,
        started_at: parse_optional_timestamp(row, 8, "started_at")?,
        completed_at: parse_optional_timestamp(row, 9, "completed_at")?,
    })
}

fn load_task(conn: &Connection, id: &str) -> StoreResult<Task> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let mut task = conn
        .query_row(&sql, params![id], row_to_task)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let mut stmt =
        conn.prepare("SELECT message_json FROM task_messages WHERE task_id = ?1 ORDER BY seq")?;
    task.history = stmt
        .query_map(params![id], |row| parse_json_field::<Message>(row, 0, "message_json"))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt =
        conn.prepare("SELECT artifact_json FROM task_artifacts WHERE task_id = ?1 ORDER BY seq")?;
    task.artifacts = stmt
        .query_map(params![id], |row| parse_json_field::<Artifact>(row, 0, "artifact_json"))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(task)
}

fn context_of(conn: &Connection, id: &str) -> StoreResult<String> {
    conn.query_row("SELECT context_id FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn rfc3339(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: Task) -> StoreResult<TaskId> {
        task.validate_new()?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![task.id], |row| row.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Duplicate(task.id));
        }

        tx.execute(
            "INSERT INTO tasks (id, context_id, kind, state, status_message, status_timestamp, assigned_agent, priority, created_at, started_at, completed_at) VALUES (?1, ?2, 'task', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.id,
                task.context_id,
                task.status.state.as_str(),
                task.status.message,
                task.status.timestamp.to_rfc3339(),
                task.assigned_agent,
                task.priority,
                task.created_at.to_rfc3339(),
                rfc3339(task.started_at),
                rfc3339(task.completed_at),
            ],
        )?;
        for (seq, message) in task.history.iter().enumerate() {
            tx.execute(
                "INSERT INTO task_messages (task_id, seq, message_id, message_json) VALUES (?1, ?2, ?3, ?4)",
                params![task.id, seq as i64 + 1, message.message_id, serde_json::to_string(message)?],
            )?;
        }
        tx.commit()?;

        info!(task_id = %task.id, "Created task");
        Ok(task.id)
    }

    async fn get(&self, id: &str) -> StoreResult<Task> {
        load_task(&self.conn(), id)
    }

    async fn update_status(
        &self,
        id: &str,
        state: TaskState,
        message: Option<String>,
    ) -> StoreResult<Task> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut task = load_task(&tx, id)?;
        TaskStateMachine::apply(&mut task, state, message)?;

        tx.execute(
            "UPDATE tasks SET state = ?2, status_message = ?3, status_timestamp = ?4, started_at = ?5, completed_at = ?6 WHERE id = ?1",
            params![
                id,
                task.status.state.as_str(),
                task.status.message,
                task.status.timestamp.to_rfc3339(),
                rfc3339(task.started_at),
                rfc3339(task.completed_at),
            ],
        )?;
        tx.commit()?;
        Ok(task)
    }

    async fn append_message(&self, id: &str, mut message: Message) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        message.context_id = context_of(&tx, id)?;
        message.task_id = id.to_string();

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO task_messages (task_id, seq, message_id, message_json) \
             SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3 FROM task_messages WHERE task_id = ?1",
            params![id, message.message_id, serde_json::to_string(&message)?],
        )?;
        tx.commit()?;

        if inserted == 0 {
            debug!(task_id = %id, message_id = %message.message_id, "Message already recorded");
        }
        Ok(())
    }

    async fn append_artifact(&self, id: &str, artifact: Artifact) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        context_of(&tx, id)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO task_artifacts (task_id, seq, artifact_id, artifact_json) \
             SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3 FROM task_artifacts WHERE task_id = ?1",
            params![id, artifact.artifact_id, serde_json::to_string(&artifact)?],
        )?;
        tx.commit()?;

        if inserted == 0 {
            debug!(task_id = %id, artifact_id = %artifact.artifact_id, "Artifact already recorded");
        }
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM tasks ORDER BY created_at DESC, id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| load_task(&conn, id)).collect()
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM task_messages WHERE task_id = ?1", params![id])?;
        tx.execute("DELETE FROM task_artifacts WHERE task_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.commit()?;
        info!(task_id = %id, "Deleted task");
        Ok(())
    }
}
