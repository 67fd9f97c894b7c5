//! Daemon health: heartbeat, counters, and the health verdict.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::write_json_atomic;

/// Health verdict of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    /// Within limits and beating.
    Healthy,
    /// Memory above the configured limit.
    Degraded,
    /// No heartbeat for three tick intervals. Only a watcher can see
    /// this; a hung process cannot report it about itself.
    Failing,
}

/// Persisted cumulative counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounters {
    /// Tasks executed to completion.
    pub tasks_executed: u64,
    /// Tasks that failed.
    pub tasks_failed: u64,
}

/// A point-in-time health reading.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// The verdict.
    pub verdict: HealthVerdict,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
    /// Resident memory in MB (0 where unavailable).
    pub memory_mb: u64,
    /// Current scheduler queue length.
    pub queue_length: usize,
    /// Cumulative counters.
    pub counters: HealthCounters,
}

/// Handler invoked once per transition into the degraded state.
pub type DegradedHandler = Box<dyn Fn(&HealthSnapshot) + Send + Sync>;

struct HealthInner {
    last_heartbeat: Instant,
    counters: HealthCounters,
    degraded: bool,
}

/// Heartbeat and counters for the daemon loop.
pub struct HealthMonitor {
    started: Instant,
    tick: Duration,
    memory_limit_mb: u64,
    inner: Mutex<HealthInner>,
    on_degraded: Option<DegradedHandler>,
    path: Option<PathBuf>,
}

impl HealthMonitor {
    /// Create a monitor with the daemon's tick interval and memory limit.
    #[must_use]
    pub fn new(tick: Duration, memory_limit_mb: u64) -> Self {
        Self {
            started: Instant::now(),
            tick,
            memory_limit_mb,
            inner: Mutex::new(HealthInner {
                last_heartbeat: Instant::now(),
                counters: HealthCounters::default(),
                degraded: false,
            }),
            on_degraded: None,
            path: None,
        }
    }

    /// Install the degraded-transition handler.
    #[must_use]
    pub fn with_degraded_handler(mut self, handler: DegradedHandler) -> Self {
        self.on_degraded = Some(handler);
        self
    }

    /// Persist counters to this path after every task record.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Record a heartbeat. Called on every daemon tick.
    pub fn beat(&self) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last_heartbeat = Instant::now();
    }

    /// Record a finished task and persist the counters.
    pub fn record_task(&self, success: bool) {
        let counters = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if success {
                inner.counters.tasks_executed += 1;
            } else {
                inner.counters.tasks_failed += 1;
            }
            inner.counters
        };
        if let Some(path) = &self.path
            && let Err(e) = write_json_atomic(path, &counters)
        {
            warn!(path = %path.display(), error = %e, "failed to persist health counters");
        }
    }

    /// Self-reported snapshot: healthy or degraded.
    ///
    /// On the transition into degraded the configured handler fires
    /// exactly once.
    pub fn snapshot(&self, queue_length: usize) -> HealthSnapshot {
        let memory_mb = resident_memory_mb();
        let degraded_now = memory_mb > self.memory_limit_mb;
        let (counters, entered_degraded) = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let entered = degraded_now && !inner.degraded;
            inner.degraded = degraded_now;
            (inner.counters, entered)
        };
        let snapshot = HealthSnapshot {
            verdict: if degraded_now { HealthVerdict::Degraded } else { HealthVerdict::Healthy },
            uptime_secs: self.started.elapsed().as_secs(),
            memory_mb,
            queue_length,
            counters,
        };
        if entered_degraded
            && let Some(handler) = &self.on_degraded
        {
            handler(&snapshot);
        }
        snapshot
    }

    /// Watcher-side verdict over the heartbeat: failing after three
    /// missed tick intervals.
    #[must_use]
    pub fn observe(&self) -> HealthVerdict {
        let age = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last_heartbeat
            .elapsed();
        if age >= self.tick * 3 {
            HealthVerdict::Failing
        } else if resident_memory_mb() > self.memory_limit_mb {
            HealthVerdict::Degraded
        } else {
            HealthVerdict::Healthy
        }
    }

    /// Cumulative counters.
    #[must_use]
    pub fn counters(&self) -> HealthCounters {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .counters
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("tick", &self.tick)
            .field("memory_limit_mb", &self.memory_limit_mb)
            .finish_non_exhaustive()
    }
}

/// Resident set size in MB, from `/proc/self/status` on Linux, 0 elsewhere.
#[must_use]
pub fn resident_memory_mb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb / 1024;
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}
