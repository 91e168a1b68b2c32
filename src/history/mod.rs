//! Bounded ring buffers for task records, error records, and log
//! records (§4.2). `VecDeque`-backed for genuine FIFO eviction — the
//! teacher's `result_store.rs` evicts via `HashMap::keys().next()`,
//! which doesn't guarantee insertion order in Rust; this buffer always
//! evicts the oldest entry, matching testable property #6.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::models::{ErrorRecord, LogEntry, TaskRecord, TaskStatus};

#[derive(Clone)]
pub struct TaskHistory {
    inner: Arc<Mutex<TaskHistoryInner>>,
}

struct TaskHistoryInner {
    order: VecDeque<String>,
    by_id: HashMap<String, TaskRecord>,
    capacity: usize,
}

impl TaskHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TaskHistoryInner {
                order: VecDeque::new(),
                by_id: HashMap::new(),
                capacity,
            })),
        }
    }

    pub async fn add(&self, record: TaskRecord) {
        let mut inner = self.inner.lock().await;
        if inner.order.len() >= inner.capacity {
            if let Some(evicted_id) = inner.order.pop_front() {
                inner.by_id.remove(&evicted_id);
            }
        }
        inner.order.push_back(record.task_id.clone());
        inner.by_id.insert(record.task_id.clone(), record);
    }

    /// Mutates an existing record in place; no-op if the id is unknown
    /// (a task record that was already evicted stays evicted).
    pub async fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        end_time: Option<chrono::DateTime<chrono::Utc>>,
        error_message: Option<String>,
        agent_logs: Option<String>,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_id.get_mut(task_id) {
            record.status = status;
            if end_time.is_some() {
                record.end_time = end_time;
            }
            if error_message.is_some() {
                record.error_message = error_message;
            }
            if agent_logs.is_some() {
                record.agent_logs = agent_logs;
            }
        }
    }

    /// Newest first (§4.2).
    pub async fn get_all(&self) -> Vec<TaskRecord> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    pub async fn get_by_id(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().await.by_id.get(task_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }
}

#[derive(Clone)]
pub struct ErrorHistory {
    inner: Arc<Mutex<VecDeque<ErrorRecord>>>,
    capacity: usize,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    pub async fn add(&self, record: ErrorRecord) {
        let mut inner = self.inner.lock().await;
        if inner.len() >= self.capacity {
            inner.pop_front();
        }
        inner.push_back(record);
    }

    /// Newest first.
    pub async fn get_all(&self) -> Vec<ErrorRecord> {
        self.inner.lock().await.iter().rev().cloned().collect()
    }

    pub async fn get_recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let inner = self.inner.lock().await;
        let total = inner.len();
        let start = total.saturating_sub(limit);
        inner.iter().skip(start).rev().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Backed by a plain `std::sync::Mutex`, not the async `tokio::Mutex`
/// used elsewhere in this module: the tracing layer that feeds this
/// buffer (`logging.rs`) runs from a synchronous `on_event` hook with
/// no async context to await into, mirroring the original
/// `MemoryLogHandler`'s own `threading.Lock`-guarded deque.
#[derive(Clone)]
pub struct LogHistory {
    inner: Arc<std::sync::Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl LogHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    pub fn add(&self, entry: LogEntry) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.len() >= self.capacity {
            inner.pop_front();
        }
        inner.push_back(entry);
    }

    /// Newest first, optionally filtered by level (case-insensitive).
    pub fn get_logs(&self, limit: usize, level: Option<&str>) -> Vec<LogEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let level_upper = level.map(|l| l.to_uppercase());
        inner
            .iter()
            .rev()
            .filter(|entry| match level_upper.as_deref() {
                Some(l) => entry.level == l,
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorRecord;

    fn record(task_id: &str) -> TaskRecord {
        TaskRecord::new(task_id.to_string(), "a1".to_string(), "Reviewer".to_string(), "review".to_string())
    }

    #[tokio::test]
    async fn evicts_oldest_on_overflow() {
        let history = TaskHistory::new(2);
        history.add(record("t1")).await;
        history.add(record("t2")).await;
        history.add(record("t3")).await;

        assert_eq!(history.len().await, 2);
        assert!(history.get_by_id("t1").await.is_none());
        assert!(history.get_by_id("t2").await.is_some());
        assert!(history.get_by_id("t3").await.is_some());
    }

    #[tokio::test]
    async fn get_all_returns_newest_first() {
        let history = TaskHistory::new(10);
        history.add(record("t1")).await;
        history.add(record("t2")).await;

        let all = history.get_all().await;
        assert_eq!(all[0].task_id, "t2");
        assert_eq!(all[1].task_id, "t1");
    }

    #[tokio::test]
    async fn update_is_a_no_op_for_unknown_id() {
        let history = TaskHistory::new(10);
        history.update("missing", TaskStatus::Completed, None, None, None).await;
        assert!(history.get_by_id("missing").await.is_none());
    }

    #[tokio::test]
    async fn error_history_evicts_oldest() {
        let errors = ErrorHistory::new(1);
        errors
            .add(ErrorRecord {
                error_id: "e1".to_string(),
                timestamp: chrono::Utc::now(),
                message: "first".to_string(),
                task_id: None,
                agent_id: None,
                module: None,
                traceback_snippet: None,
            })
            .await;
        errors
            .add(ErrorRecord {
                error_id: "e2".to_string(),
                timestamp: chrono::Utc::now(),
                message: "second".to_string(),
                task_id: None,
                agent_id: None,
                module: None,
                traceback_snippet: None,
            })
            .await;

        let all = errors.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].error_id, "e2");
    }

    #[test]
    fn log_history_filters_by_level() {
        let logs = LogHistory::new(10);
        logs.add(LogEntry {
            timestamp: "t".to_string(),
            level: "INFO".to_string(),
            logger_name: "orchestrator".to_string(),
            message: "hello".to_string(),
            task_id: None,
            agent_id: None,
        });
        logs.add(LogEntry {
            timestamp: "t".to_string(),
            level: "ERROR".to_string(),
            logger_name: "orchestrator".to_string(),
            message: "uh oh".to_string(),
            task_id: None,
            agent_id: None,
        });

        let errors_only = logs.get_logs(10, Some("error"));
        assert_eq!(errors_only.len(), 1);
        assert_eq!(errors_only[0].message, "uh oh");
    }
}
