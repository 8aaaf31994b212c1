//! Task Store (C7): durable task records backed by an embedded SQLite
//! database so that chunk-completion counters are genuine atomic SQL
//! updates rather than app-level read-modify-write (§4.7).
//!
//! Every write is also mirrored to an append-only JSONL log next to the
//! database file. The log is the recovery path: if the database file is
//! ever absent, [`TaskStore::open`] replays it to rebuild the SQL table.
//! The log is not a second source of truth callers read from.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use sw_domain::error::{Error, Result};
use sw_domain::model::{compute_progress, Task, TaskStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id               TEXT PRIMARY KEY,
    status           TEXT NOT NULL,
    current_step     TEXT NOT NULL,
    total_chunks     INTEGER NOT NULL DEFAULT 0,
    completed_chunks INTEGER NOT NULL DEFAULT 0,
    progress         INTEGER NOT NULL DEFAULT 0,
    result           TEXT,
    error            TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
";

/// One mutating operation, mirrored to the JSONL log in the order applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
enum LogEntry {
    Create { id: String, created_at: String },
    Update {
        id: String,
        status: Option<TaskStatus>,
        current_step: Option<String>,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    UpdateChunksInfo { id: String, total: u32, completed: u32 },
    IncrementCompletedChunk { id: String },
    Delete { id: String },
}

/// Patch applied by [`TaskStore::update`]. `None` fields are left unchanged.
#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub current_step: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub struct TaskStore {
    conn: Mutex<Connection>,
    log_path: PathBuf,
}

impl TaskStore {
    /// Open (or create) the database at `database_path`. If the file did
    /// not already exist, replays the sibling `.log` file to rebuild it.
    pub fn open(database_path: &str) -> Result<Self> {
        let db_path = Path::new(database_path);
        let existed = db_path.exists();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log_path = log_path_for(db_path);

        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;

        let store = Self {
            conn: Mutex::new(conn),
            log_path,
        };
        if !existed {
            store.rebuild_from_log()?;
        }
        Ok(store)
    }

    fn append_log(&self, entry: &LogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    fn rebuild_from_log(&self) -> Result<()> {
        let Ok(contents) = fs::read_to_string(&self.log_path) else {
            return Ok(());
        };
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(line)?;
            self.apply_logged(entry)?;
        }
        Ok(())
    }

    /// Replay a single logged mutation directly against SQL, without
    /// re-appending it to the log (avoids doubling entries on rebuild).
    fn apply_logged(&self, entry: LogEntry) -> Result<()> {
        let conn = self.conn.lock().expect("task store mutex poisoned");
        match entry {
            LogEntry::Create { id, created_at } => {
                conn.execute(
                    "INSERT OR IGNORE INTO tasks (id, status, current_step, total_chunks, completed_chunks, progress, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 0, 0, 0, ?4, ?4)",
                    params![id, TaskStatus::Pending.as_str(), "waiting to start", created_at],
                )?;
            }
            LogEntry::Update { id, status, current_step, result, error } => {
                apply_update(&conn, &id, status, current_step, result, error)?;
            }
            LogEntry::UpdateChunksInfo { id, total, completed } => {
                apply_chunks_info(&conn, &id, total, completed)?;
            }
            LogEntry::IncrementCompletedChunk { id } => {
                apply_increment(&conn, &id)?;
            }
            LogEntry::Delete { id } => {
                conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            }
        }
        Ok(())
    }

    /// Create a new task row with zero chunks and `Pending` status.
    pub fn create(&self, task_id: &str) -> Result<Task> {
        let created_at = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock().expect("task store mutex poisoned");
            conn.execute(
                "INSERT INTO tasks (id, status, current_step, total_chunks, completed_chunks, progress, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, 0, 0, ?4, ?4)",
                params![task_id, TaskStatus::Pending.as_str(), "waiting to start", created_at],
            )?;
        }
        self.append_log(&LogEntry::Create {
            id: task_id.to_string(),
            created_at,
        })?;
        self.get(task_id)?.ok_or_else(|| Error::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    /// Apply a partial update; recomputes `progress` from the resulting
    /// status/chunk counts.
    pub fn update(&self, task_id: &str, patch: TaskPatch) -> Result<Task> {
        {
            let conn = self.conn.lock().expect("task store mutex poisoned");
            apply_update(
                &conn,
                task_id,
                patch.status,
                patch.current_step.clone(),
                patch.result.clone(),
                patch.error.clone(),
            )?;
        }
        self.append_log(&LogEntry::Update {
            id: task_id.to_string(),
            status: patch.status,
            current_step: patch.current_step,
            result: patch.result,
            error: patch.error,
        })?;
        self.get(task_id)?.ok_or_else(|| Error::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    /// Set `total_chunks` (from the Chunker) and reset `completed_chunks`.
    pub fn update_chunks_info(&self, task_id: &str, total: u32, completed: u32) -> Result<Task> {
        {
            let conn = self.conn.lock().expect("task store mutex poisoned");
            apply_chunks_info(&conn, task_id, total, completed)?;
        }
        self.append_log(&LogEntry::UpdateChunksInfo {
            id: task_id.to_string(),
            total,
            completed,
        })?;
        self.get(task_id)?.ok_or_else(|| Error::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    /// Atomically increment `completed_chunks` by one and recompute
    /// `progress`, returning the new completed count. `completed_chunks`
    /// never exceeds `total_chunks` — the clamp is applied in SQL.
    pub fn increment_completed_chunk(&self, task_id: &str) -> Result<u32> {
        let new_completed = {
            let conn = self.conn.lock().expect("task store mutex poisoned");
            apply_increment(&conn, task_id)?
        };
        self.append_log(&LogEntry::IncrementCompletedChunk {
            id: task_id.to_string(),
        })?;
        Ok(new_completed)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.conn.lock().expect("task store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT id, status, current_step, total_chunks, completed_chunks, progress, result, error, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("task store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, status, current_step, total_chunks, completed_chunks, progress, result, error, created_at, updated_at
             FROM tasks ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete(&self, task_id: &str) -> Result<()> {
        {
            let conn = self.conn.lock().expect("task store mutex poisoned");
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        }
        self.append_log(&LogEntry::Delete {
            id: task_id.to_string(),
        })?;
        Ok(())
    }

    /// Delete terminal tasks whose `updated_at` is older than `ttl`. Used
    /// by the periodic stale-task cleanup background task (§4.10 step 5).
    pub fn evict_stale(&self, ttl: chrono::Duration) -> Result<usize> {
        let cutoff = (Utc::now() - ttl).to_rfc3339();
        let ids: Vec<String> = {
            let conn = self.conn.lock().expect("task store mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id FROM tasks WHERE updated_at < ?1 AND status IN ('completed', 'failed')",
            )?;
            stmt.query_map(params![cutoff], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for id in &ids {
            self.delete(id)?;
        }
        Ok(ids.len())
    }
}

fn log_path_for(db_path: &Path) -> PathBuf {
    let mut path = db_path.as_os_str().to_owned();
    path.push(".log");
    PathBuf::from(path)
}

fn apply_update(
    conn: &Connection,
    task_id: &str,
    status: Option<TaskStatus>,
    current_step: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
) -> Result<()> {
    let existing = conn
        .query_row(
            "SELECT status, total_chunks, completed_chunks FROM tasks WHERE id = ?1",
            params![task_id],
            |r| {
                let status_str: String = r.get(0)?;
                let total: u32 = r.get(1)?;
                let completed: u32 = r.get(2)?;
                Ok((status_str, total, completed))
            },
        )
        .optional()?;
    let Some((existing_status, total, completed)) = existing else {
        return Err(Error::TaskNotFound {
            task_id: task_id.to_string(),
        });
    };
    let effective_status = status.unwrap_or(
        TaskStatus::from_str(&existing_status).map_err(|_| {
            Error::Other(format!("corrupt status value in store: {existing_status}"))
        })?,
    );
    let progress = compute_progress(effective_status, completed, total);
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE tasks SET
            status = COALESCE(?2, status),
            current_step = COALESCE(?3, current_step),
            result = COALESCE(?4, result),
            error = COALESCE(?5, error),
            progress = ?6,
            updated_at = ?7
         WHERE id = ?1",
        params![
            task_id,
            status.map(|s| s.as_str().to_string()),
            current_step,
            result.map(|v| v.to_string()),
            error,
            progress,
            now,
        ],
    )?;
    Ok(())
}

fn apply_chunks_info(conn: &Connection, task_id: &str, total: u32, completed: u32) -> Result<()> {
    let status_str: Option<String> = conn
        .query_row(
            "SELECT status FROM tasks WHERE id = ?1",
            params![task_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(status_str) = status_str else {
        return Err(Error::TaskNotFound {
            task_id: task_id.to_string(),
        });
    };
    let status = TaskStatus::from_str(&status_str)
        .map_err(|_| Error::Other(format!("corrupt status value in store: {status_str}")))?;
    let progress = compute_progress(status, completed, total);
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE tasks SET total_chunks = ?2, completed_chunks = ?3, progress = ?4, updated_at = ?5 WHERE id = ?1",
        params![task_id, total, completed, progress, now],
    )?;
    Ok(())
}

/// The atomic counter increment: a single `UPDATE ... SET x = x + 1`
/// statement, clamped so `completed_chunks` never exceeds `total_chunks`.
fn apply_increment(conn: &Connection, task_id: &str) -> Result<u32> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE tasks SET
            completed_chunks = MIN(completed_chunks + 1, total_chunks),
            updated_at = ?2
         WHERE id = ?1",
        params![task_id, now],
    )?;
    let (status_str, total, completed): (String, u32, u32) = conn
        .query_row(
            "SELECT status, total_chunks, completed_chunks FROM tasks WHERE id = ?1",
            params![task_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| Error::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
    let status = TaskStatus::from_str(&status_str)
        .map_err(|_| Error::Other(format!("corrupt status value in store: {status_str}")))?;
    let progress = compute_progress(status, completed, total);
    conn.execute(
        "UPDATE tasks SET progress = ?2 WHERE id = ?1",
        params![task_id, progress],
    )?;
    Ok(completed)
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get(1)?;
    let status = TaskStatus::from_str(&status_str).unwrap_or(TaskStatus::Failed);
    let result_str: Option<String> = row.get(6)?;
    let created_at_str: String = row.get(8)?;
    let updated_at_str: String = row.get(9)?;
    Ok(Task {
        id: row.get(0)?,
        status,
        current_step: row.get(2)?,
        total_chunks: row.get(3)?,
        completed_chunks: row.get(4)?,
        progress: row.get(5)?,
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(7)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (TaskStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");
        let store = TaskStore::open(db_path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    #[test]
    fn create_then_get_round_trips() {
        let (store, _dir) = temp_store();
        store.create("task-1").unwrap();
        let task = store.get("task-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
    }

    #[test]
    fn get_missing_task_returns_none() {
        let (store, _dir) = temp_store();
        assert!(store.get("does-not-exist").unwrap().is_none());
    }

    #[test]
    fn update_recomputes_progress() {
        let (store, _dir) = temp_store();
        store.create("task-1").unwrap();
        store.update_chunks_info("task-1", 10, 0).unwrap();
        let task = store
            .update(
                "task-1",
                TaskPatch {
                    status: Some(TaskStatus::Processing),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(task.progress, 20);
    }

    #[test]
    fn increment_completed_chunk_is_exact_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");
        let store = std::sync::Arc::new(TaskStore::open(db_path.to_str().unwrap()).unwrap());
        store.create("task-1").unwrap();
        store.update_chunks_info("task-1", 50, 0).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..50 {
                let store = store.clone();
                scope.spawn(move || store.increment_completed_chunk("task-1").unwrap());
            }
        });

        let task = store.get("task-1").unwrap().unwrap();
        assert_eq!(task.completed_chunks, 50);
    }

    #[test]
    fn increment_never_exceeds_total() {
        let (store, _dir) = temp_store();
        store.create("task-1").unwrap();
        store.update_chunks_info("task-1", 2, 0).unwrap();
        store.increment_completed_chunk("task-1").unwrap();
        store.increment_completed_chunk("task-1").unwrap();
        store.increment_completed_chunk("task-1").unwrap();
        let task = store.get("task-1").unwrap().unwrap();
        assert_eq!(task.completed_chunks, 2);
    }

    #[test]
    fn delete_removes_task() {
        let (store, _dir) = temp_store();
        store.create("task-1").unwrap();
        store.delete("task-1").unwrap();
        assert!(store.get("task-1").unwrap().is_none());
    }

    #[test]
    fn list_orders_by_created_at_desc() {
        let (store, _dir) = temp_store();
        store.create("task-1").unwrap();
        store.create("task-2").unwrap();
        let tasks = store.list().unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn rebuild_from_log_recovers_state_after_db_loss() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");
        {
            let store = TaskStore::open(db_path.to_str().unwrap()).unwrap();
            store.create("task-1").unwrap();
            store.update_chunks_info("task-1", 4, 0).unwrap();
            store.increment_completed_chunk("task-1").unwrap();
            store.increment_completed_chunk("task-1").unwrap();
        }
        // Simulate the database file being lost; the log survives.
        std::fs::remove_file(&db_path).unwrap();

        let recovered = TaskStore::open(db_path.to_str().unwrap()).unwrap();
        let task = recovered.get("task-1").unwrap().unwrap();
        assert_eq!(task.total_chunks, 4);
        assert_eq!(task.completed_chunks, 2);
    }
}
