//! The task scheduler: a persisted priority queue with crash recovery.
//!
//! Ordering is ascending priority (lower runs earlier), ties broken by
//! creation time. Enqueueing is idempotent by goal. The whole state —
//! queue plus bounded history — is written to `task-queue.json` after
//! every mutation; on load, tasks that were `running` when the process
//! died are reset to `pending` (at-least-once semantics).

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::store::write_json_atomic;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Handed to a runner.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
}

/// A scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDef {
    /// Stable identifier.
    pub id: String,
    /// The goal the agent will pursue.
    pub goal: String,
    /// Priority; lower runs earlier.
    pub priority: i32,
    /// Creation time; tie-breaker within a priority.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Optional per-task step budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    /// Steps the run actually took.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_executed: Option<usize>,
    /// Error of a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the task finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskDef {
    /// Create a pending task with a generated id.
    #[must_use]
    pub fn new(goal: impl Into<String>, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            priority,
            created_at: Utc::now(),
            status: TaskStatus::Pending,
            max_steps: None,
            steps_executed: None,
            error: None,
            finished_at: None,
        }
    }

    /// Set the per-task step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    queue: Vec<TaskDef>,
    history: Vec<TaskDef>,
}

/// The persisted priority queue.
#[derive(Debug)]
pub struct TaskScheduler {
    queue: Vec<TaskDef>,
    history: VecDeque<TaskDef>,
    path: Option<PathBuf>,
    history_limit: usize,
    high_water_mark: usize,
}

impl TaskScheduler {
    /// Create an in-memory scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Vec::new(),
            history: VecDeque::new(),
            path: None,
            history_limit: 100,
            high_water_mark: 1000,
        }
    }

    /// Attach the persistence path and load existing state.
    ///
    /// Any task that was `running` is reset to `pending`; history is
    /// preserved as stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error when an existing file cannot be parsed. A
    /// missing file is fine.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| AgentError::storage(path.display().to_string(), e.to_string()))?;
            let mut state: QueueState = serde_json::from_str(&data)
                .map_err(|e| AgentError::storage(path.display().to_string(), e.to_string()))?;
            let mut recovered = 0usize;
            for task in &mut state.queue {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Pending;
                    recovered += 1;
                }
            }
            if recovered > 0 {
                info!(recovered, "reset interrupted tasks to pending");
            }
            self.queue = state.queue;
            self.history = state.history.into();
            self.sort();
        }
        self.path = Some(path);
        Ok(self)
    }

    /// Set the bounded history length.
    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the backpressure high-water mark.
    #[must_use]
    pub const fn with_high_water_mark(mut self, mark: usize) -> Self {
        self.high_water_mark = mark;
        self
    }

    /// Enqueue a task. Idempotent by goal: when any queued task carries
    /// the same goal the enqueue is dropped and `false` is returned.
    pub fn enqueue(&mut self, task: TaskDef) -> bool {
        if self.queue.iter().any(|queued| queued.goal == task.goal) {
            debug!(goal = %task.goal, "duplicate goal, dropping enqueue");
            return false;
        }
        self.queue.push(task);
        self.sort();
        self.persist();
        true
    }

    /// Pop the highest-priority pending task, marking it running.
    pub fn dequeue(&mut self) -> Option<TaskDef> {
        let task = self
            .queue
            .iter_mut()
            .find(|task| task.status == TaskStatus::Pending)?;
        task.status = TaskStatus::Running;
        let snapshot = task.clone();
        self.persist();
        Some(snapshot)
    }

    /// Mark a running task done and move it to history.
    pub fn complete(&mut self, id: &str, steps_executed: usize) {
        self.finish(id, TaskStatus::Done, Some(steps_executed), None);
    }

    /// Mark a running task failed and move it to history.
    pub fn fail(&mut self, id: &str, error: impl Into<String>) {
        self.finish(id, TaskStatus::Failed, None, Some(error.into()));
    }

    /// Change a queued task's priority, re-sorting the queue.
    pub fn prioritize(&mut self, id: &str, new_priority: i32) -> bool {
        let Some(task) = self.queue.iter_mut().find(|task| task.id == id) else {
            return false;
        };
        task.priority = new_priority;
        self.sort();
        self.persist();
        true
    }

    /// Pending tasks in dequeue order.
    #[must_use]
    pub fn get_pending(&self) -> Vec<TaskDef> {
        self.queue
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .cloned()
            .collect()
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.iter().filter(|task| task.status == TaskStatus::Pending).count()
    }

    /// Completed/failed tasks, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<TaskDef> {
        self.history.iter().cloned().collect()
    }

    /// Whether the pending count is at or above the high-water mark.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.pending_len() >= self.high_water_mark
    }

    fn finish(
        &mut self,
        id: &str,
        status: TaskStatus,
        steps_executed: Option<usize>,
        error: Option<String>,
    ) {
        let Some(position) = self.queue.iter().position(|task| task.id == id) else {
            warn!(id, "finish for unknown task");
            return;
        };
        let mut task = self.queue.remove(position);
        task.status = status;
        task.steps_executed = steps_executed;
        task.error = error;
        task.finished_at = Some(Utc::now());
        self.history.push_back(task);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        self.persist();
    }

    fn sort(&mut self) {
        self.queue
            .sort_by(|a, b| (a.priority, a.created_at).cmp(&(b.priority, b.created_at)));
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let state = QueueState {
            queue: self.queue.clone(),
            history: self.history.iter().cloned().collect(),
        };
        if let Err(e) = write_json_atomic(path, &state) {
            warn!(path = %path.display(), error = %e, "failed to persist task queue");
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
