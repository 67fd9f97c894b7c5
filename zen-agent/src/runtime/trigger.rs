//! Trigger sources: interval, cron, and named event channels.
//!
//! Every firing goes through the same gate: above the scheduler's
//! high-water mark the enqueue is dropped and an `overflow` event is
//! emitted; below it, the scheduler's own goal deduplication applies.
//!
//! Interval triggers never catch up missed ticks. Cron triggers are
//! checked at 1 Hz and fire exactly once per matching minute. Removing a
//! trigger aborts its timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::event::{AgentEvent, EventBus};

use super::cron;
use super::scheduler::{TaskDef, TaskScheduler};

/// Scheduler shared between the daemon and the trigger timers.
pub type SharedScheduler = Arc<Mutex<TaskScheduler>>;

/// The kind of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Fires every `pattern` milliseconds.
    Interval,
    /// Fires on 5-field cron matches of `pattern`.
    Cron,
    /// Fires when external code calls [`TriggerManager::fire`] with the
    /// channel named by `pattern`.
    Event,
}

/// The partial task a trigger instantiates on each firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Goal of the instantiated task.
    pub goal: String,
    /// Priority of the instantiated task.
    #[serde(default)]
    pub priority: i32,
    /// Optional per-task step budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

impl TaskSpec {
    /// Create a spec with default priority.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self { goal: goal.into(), priority: 0, max_steps: None }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn instantiate(&self, payload: Option<&Value>) -> TaskDef {
        let goal = match payload {
            Some(payload) if !payload.is_null() => {
                format!("{}\nEvent payload: {payload}", self.goal)
            }
            _ => self.goal.clone(),
        };
        let mut task = TaskDef::new(goal, self.priority);
        task.max_steps = self.max_steps;
        task
    }
}

/// A registered trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDef {
    /// Stable identifier.
    pub id: String,
    /// The kind of trigger.
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    /// Interval millis, cron expression, or event channel name.
    pub pattern: String,
    /// The task to instantiate on each firing.
    pub task: TaskSpec,
    /// Disabled triggers never fire.
    pub enabled: bool,
}

impl TriggerDef {
    /// Create an enabled trigger.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: TriggerKind,
        pattern: impl Into<String>,
        task: TaskSpec,
    ) -> Self {
        Self { id: id.into(), kind, pattern: pattern.into(), task, enabled: true }
    }

    /// Disable the trigger.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Owns trigger timers and routes firings into the scheduler.
pub struct TriggerManager {
    scheduler: SharedScheduler,
    events: Arc<EventBus>,
    timers: HashMap<String, JoinHandle<()>>,
    triggers: HashMap<String, TriggerDef>,
}

impl TriggerManager {
    /// Create a manager over a shared scheduler and event bus.
    #[must_use]
    pub fn new(scheduler: SharedScheduler, events: Arc<EventBus>) -> Self {
        Self { scheduler, events, timers: HashMap::new(), triggers: HashMap::new() }
    }

    /// Register a trigger, starting its timer when applicable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a duplicate id or an interval
    /// pattern that is not a positive integer.
    pub fn add(&mut self, trigger: TriggerDef) -> Result<()> {
        if self.triggers.contains_key(&trigger.id) {
            return Err(AgentError::config(format!("duplicate trigger id '{}'", trigger.id)));
        }
        if trigger.enabled {
            match trigger.kind {
                TriggerKind::Interval => {
                    let millis: u64 = trigger.pattern.parse().map_err(|_| {
                        AgentError::config(format!(
                            "interval pattern '{}' is not a millisecond count",
                            trigger.pattern
                        ))
                    })?;
                    if millis == 0 {
                        return Err(AgentError::config("interval must be positive"));
                    }
                    self.timers
                        .insert(trigger.id.clone(), self.spawn_interval(millis, trigger.task.clone()));
                }
                TriggerKind::Cron => {
                    self.timers.insert(
                        trigger.id.clone(),
                        self.spawn_cron(trigger.pattern.clone(), trigger.task.clone()),
                    );
                }
                TriggerKind::Event => {}
            }
        }
        self.triggers.insert(trigger.id.clone(), trigger);
        Ok(())
    }

    /// Remove a trigger, stopping its timer.
    pub fn remove(&mut self, id: &str) -> bool {
        if let Some(handle) = self.timers.remove(id) {
            handle.abort();
        }
        self.triggers.remove(id).is_some()
    }

    /// Fire a named event channel. Returns whether a trigger accepted it.
    pub fn fire(&self, name: &str, payload: Value) -> bool {
        let Some(trigger) = self.triggers.values().find(|trigger| {
            trigger.enabled && trigger.kind == TriggerKind::Event && trigger.pattern == name
        }) else {
            debug!(name, "no enabled event trigger for channel");
            return false;
        };
        try_enqueue(&self.scheduler, &self.events, &trigger.task, Some(&payload));
        true
    }

    /// Registered triggers, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<&TriggerDef> {
        self.triggers.values().collect()
    }

    /// Stop every timer. Registered definitions are kept.
    pub fn stop_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    fn spawn_interval(&self, millis: u64, task: TaskSpec) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            let period = Duration::from_millis(millis);
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            // Missed ticks are skipped, never replayed on wake.
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                try_enqueue(&scheduler, &events, &task, None);
            }
        })
    }

    fn spawn_cron(&self, pattern: String, task: TaskSpec) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            let mut last_fired: Option<i64> = None;
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let now = Utc::now();
                if let Some(key) = cron_due(&pattern, &now, last_fired) {
                    last_fired = Some(key);
                    try_enqueue(&scheduler, &events, &task, None);
                }
            }
        })
    }
}

impl Drop for TriggerManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for TriggerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerManager")
            .field("triggers", &self.triggers.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

/// Decide whether a cron trigger fires now: the minute must match and must
/// differ from the last fired minute.
fn cron_due(
    pattern: &str,
    now: &chrono::DateTime<Utc>,
    last_fired: Option<i64>,
) -> Option<i64> {
    let key = cron::minute_key(now);
    if last_fired == Some(key) || !cron::matches(pattern, now) {
        return None;
    }
    Some(key)
}

/// The backpressure gate every firing goes through.
fn try_enqueue(
    scheduler: &SharedScheduler,
    events: &EventBus,
    spec: &TaskSpec,
    payload: Option<&Value>,
) {
    let task = spec.instantiate(payload);
    let goal = task.goal.clone();
    let mut scheduler = scheduler.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if scheduler.is_saturated() {
        warn!(%goal, "scheduler at high-water mark, dropping trigger firing");
        events.emit(&AgentEvent::Overflow { goal });
        return;
    }
    if scheduler.enqueue(task) {
        debug!(%goal, "trigger enqueued task");
    }
}
