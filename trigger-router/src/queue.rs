//! Named FIFO queues
//!
//! The pipeline only needs push, a pop bounded by a timeout, and a depth
//! query. Pop is the mutual-exclusion point: an item is handed to exactly one
//! caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A store of named FIFO queues holding JSON payloads
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a payload to the tail of `queue`
    async fn push(&self, queue: &str, payload: String) -> Result<()>;

    /// Take the head of `queue`, waiting up to `timeout`; `None` when empty
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// Number of items waiting in `queue`
    async fn len(&self, queue: &str) -> Result<u64>;
}

/// Serialize `value` and push it
pub async fn push_json<T: Serialize + Sync>(
    store: &dyn QueueStore,
    queue: &str,
    value: &T,
) -> Result<()> {
    let payload = serde_json::to_string(value).context("failed to serialize queue payload")?;
    store.push(queue, payload).await
}

/// In-process queue store
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get_mut(queue)?.pop_front()
    }

    /// Snapshot of a queue's contents, head first
    pub fn items(&self, queue: &str) -> Vec<String> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues.entry(queue.to_string()).or_default().push_back(payload);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so a push in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue) {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues.get(queue).map_or(0, |q| q.len() as u64))
    }
}

/// SQLite-backed queue store shared between processes
///
/// Pop is one `DELETE ... RETURNING` statement, so two consumers can never
/// receive the same row.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteQueue {
    /// Wrap a pool and create the queue table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create queue_items table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_items_queue ON queue_items (queue, id)")
            .execute(&pool)
            .await
            .context("failed to create queue_items index")?;

        Ok(Self {
            pool,
            poll_interval: Duration::from_millis(100),
        })
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>> {
        let payload: Option<String> = sqlx::query_scalar(
            "DELETE FROM queue_items
             WHERE id = (SELECT id FROM queue_items WHERE queue = ? ORDER BY id LIMIT 1)
             RETURNING payload",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to pop from queue {}", queue))?;
        Ok(payload)
    }
}

#[async_trait]
impl QueueStore for SqliteQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        sqlx::query("INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?, ?, ?)")
            .bind(queue)
            .bind(payload)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to push to queue {}", queue))?;
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_pop(queue).await? {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to count queue {}", queue))?;
        Ok(count.max(0) as u64)
    }
}
