//! SQLite-backed TaskStore.
//!
//! The connection sits behind an `Arc<Mutex<Connection>>` and every call runs
//! on tokio's blocking pool, so the async side never holds the mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::schema::{apply_schema, read_schema_version};
use crate::domain::{
    EncodedTask, Event, EventBody, EventId, EventRecord, QueueName, ScheduledTask, StoreError,
    TaskCategory, TaskId, TaskRecord, TaskState,
};
use crate::ports::{Clock, SystemClock, TaskStore};

const TASK_COLUMNS: &str = "t.id, q.name, t.kind, t.description, t.category, t.priority, \
     t.status, t.queued_at, t.retry_at, t.retries, t.failure_reason, \
     (SELECT COUNT(*) FROM event e WHERE e.task_id = t.id), t.payload \
     FROM task t JOIN queue q ON q.id = t.queue_id";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

impl SqliteTaskStore {
    /// Open (or create) the database file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            ..store
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        apply_schema(&conn)?;
        let version = read_schema_version(&conn)?;
        debug!(?version, "task store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
            path: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert raw event bytes, bypassing serialization.
    pub async fn insert_raw_event(
        &self,
        task_id: Option<TaskId>,
        payload: Vec<u8>,
    ) -> Result<EventId, StoreError> {
        let now = to_millis(self.clock.now());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO event (task_id, created_at, payload) VALUES (?1, ?2, ?3)",
                params![task_id.map(TaskId::get), now, payload],
            )?;
            Ok(EventId::from_raw(conn.last_insert_rowid()))
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Lock)?;
            f(&mut guard)
        })
        .await?
    }

    fn cutoff_millis(&self, days: u32) -> i64 {
        to_millis(self.clock.days_ago(days))
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

fn queue_id(conn: &Connection, name: &QueueName) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO queue (name) VALUES (?1)",
        params![name.as_str()],
    )?;
    conn.query_row(
        "SELECT id FROM queue WHERE name = ?1",
        params![name.as_str()],
        |row| row.get(0),
    )
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get(6)?;
    let state = TaskState::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown task status: {status}").into(),
        )
    })?;
    let event_count: i64 = row.get(11)?;
    Ok(TaskRecord {
        id: TaskId::from_raw(row.get(0)?),
        queue: QueueName::new(row.get::<_, String>(1)?),
        kind: row.get(2)?,
        description: row.get(3)?,
        category: TaskCategory::new(row.get(4)?),
        priority: row.get(5)?,
        state,
        queued_at: from_millis(7, row.get(7)?)?,
        retry_at: from_millis(8, row.get(8)?)?,
        retries: row.get(9)?,
        failure_reason: row.get(10)?,
        event_count: usize::try_from(event_count).unwrap_or(0),
        payload: row.get(12)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let task_id: Option<i64> = row.get(1)?;
    let payload: Vec<u8> = row.get(3)?;
    Ok(EventRecord {
        id: EventId::from_raw(row.get(0)?),
        task_id: task_id.map(TaskId::from_raw),
        timestamp: from_millis(2, row.get(2)?)?,
        body: EventBody::decode(&payload),
    })
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<EventRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

fn write_encoded(conn: &Connection, id: TaskId, task: &EncodedTask) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE task SET kind = ?2, description = ?3, category = ?4, priority = ?5, payload = ?6 \
         WHERE id = ?1",
        params![
            id.get(),
            task.kind,
            task.description,
            task.category.get(),
            task.priority,
            task.payload
        ],
    )
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_queue(&self, name: &QueueName) -> Result<(), StoreError> {
        let name = name.clone();
        self.with_conn(move |conn| {
            queue_id(conn, &name)?;
            Ok(())
        })
        .await
    }

    async fn queue_names(&self) -> Result<Vec<QueueName>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM queue ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(QueueName::new(row?));
            }
            Ok(names)
        })
        .await
    }

    async fn pending_queue_names(&self) -> Result<Vec<QueueName>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT q.name FROM task t JOIN queue q ON q.id = t.queue_id \
                 WHERE t.status = 'queued' ORDER BY q.name",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(QueueName::new(row?));
            }
            Ok(names)
        })
        .await
    }

    async fn enqueue_task(
        &self,
        queue: &QueueName,
        task: &EncodedTask,
    ) -> Result<TaskId, StoreError> {
        let now = to_millis(self.clock.now());
        let queue = queue.clone();
        let task = task.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let queue_id = queue_id(&tx, &queue)?;
            tx.execute(
                "INSERT INTO task (queue_id, kind, description, category, priority, status, \
                 queued_at, retry_at, retries, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?6, 0, ?7)",
                params![
                    queue_id,
                    task.kind,
                    task.description,
                    task.category.get(),
                    task.priority,
                    now,
                    task.payload
                ],
            )?;
            let id = TaskId::from_raw(tx.last_insert_rowid());
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn next_task(&self, queue: &QueueName) -> Result<Option<ScheduledTask>, StoreError> {
        let now = self.clock.now();
        let queue = queue.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} WHERE q.name = ?1 AND t.status = 'queued' \
                 ORDER BY t.retry_at, t.priority, t.id LIMIT 1"
            );
            let record = conn
                .query_row(&sql, params![queue.as_str()], row_to_task)
                .optional()?;
            Ok(record.map(|record| ScheduledTask::new(record, now)))
        })
        .await
    }

    async fn update_task(&self, id: TaskId, task: &EncodedTask) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            write_encoded(conn, id, &task)?;
            Ok(())
        })
        .await
    }

    async fn set_task_completed(&self, id: TaskId) -> Result<(), StoreError> {
        self.delete_task(id).await
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        retry_at: DateTime<Utc>,
        retries: u32,
        task: Option<&EncodedTask>,
    ) -> Result<(), StoreError> {
        let retry_at = to_millis(retry_at);
        let task = task.cloned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE task SET status = 'queued', retry_at = ?2, retries = ?3 WHERE id = ?1",
                params![id.get(), retry_at, retries],
            )?;
            if let Some(task) = &task {
                write_encoded(&tx, id, task)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM task WHERE id = ?1", params![id.get()])?;
            Ok(())
        })
        .await
    }

    async fn set_task_failed(
        &self,
        id: TaskId,
        message: &str,
        task: Option<&EncodedTask>,
    ) -> Result<(), StoreError> {
        let message = message.to_string();
        let task = task.cloned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE task SET status = 'failed', failure_reason = ?2 WHERE id = ?1",
                params![id.get(), message],
            )?;
            if let Some(task) = &task {
                write_encoded(&tx, id, task)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {TASK_COLUMNS} ORDER BY t.id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_task)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
        .await
    }

    async fn store_event(
        &self,
        task_id: Option<TaskId>,
        event: &Event,
    ) -> Result<Option<EventId>, StoreError> {
        let payload = event.encode()?;
        let now = to_millis(self.clock.now());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if let Some(task_id) = task_id {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM task WHERE id = ?1)",
                    params![task_id.get()],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(None);
                }
            }
            tx.execute(
                "INSERT INTO event (task_id, created_at, payload) VALUES (?1, ?2, ?3)",
                params![task_id.map(TaskId::get), now, payload],
            )?;
            let id = EventId::from_raw(tx.last_insert_rowid());
            tx.commit()?;
            Ok(Some(id))
        })
        .await
    }

    async fn events(&self) -> Result<Vec<EventRecord>, StoreError> {
        self.with_conn(|conn| {
            query_events(
                conn,
                "SELECT id, task_id, created_at, payload FROM event ORDER BY id",
                [],
            )
        })
        .await
    }

    async fn count_events(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM event", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn task_events(&self, task_id: TaskId) -> Result<Vec<EventRecord>, StoreError> {
        self.with_conn(move |conn| {
            query_events(
                conn,
                "SELECT id, task_id, created_at, payload FROM event WHERE task_id = ?1 ORDER BY id",
                params![task_id.get()],
            )
        })
        .await
    }

    async fn delete_event(&self, id: EventId) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM event WHERE id = ?1", params![id.get()])?;
            Ok(())
        })
        .await
    }

    async fn has_active_tasks(&self, category: TaskCategory) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let active: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM task WHERE category = ?1 AND status = 'queued')",
                params![category.get()],
                |row| row.get(0),
            )?;
            Ok(active)
        })
        .await
    }

    async fn delete_tasks_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = self.cutoff_millis(days);
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM task WHERE queued_at < ?1", params![cutoff])?)
        })
        .await
    }

    async fn delete_events_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = self.cutoff_millis(days);
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM event WHERE created_at < ?1", params![cutoff])?)
        })
        .await
    }
}
