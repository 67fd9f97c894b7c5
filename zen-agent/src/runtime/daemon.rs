//! The daemon: single-instance host for the scheduler, triggers, and
//! agent runs.
//!
//! Single-instance enforcement goes through a locked PID file: the file
//! holds the decimal process id on a single line and an exclusive advisory
//! lock for the daemon's lifetime, so a stale file from a dead process
//! never blocks a restart. On interrupt the daemon stops its trigger
//! timers, leaves in-flight tasks `running` in the persisted queue (crash
//! recovery re-enqueues them), and removes the PID file.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fs2::FileExt;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::agent::{RunReport, ZenAgent};
use crate::error::{AgentError, Result};
use crate::event::EventBus;

use super::health::HealthMonitor;
use super::scheduler::{TaskDef, TaskScheduler};
use super::trigger::{SharedScheduler, TriggerManager};

/// Builds an agent for one dequeued task.
pub type AgentFactory = Box<dyn Fn(&TaskDef) -> Result<ZenAgent> + Send + Sync>;

/// How a daemon run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonOutcome {
    /// One-shot mode drained the queue.
    Drained,
    /// An interrupt requested shutdown.
    Interrupted,
}

impl DaemonOutcome {
    /// The process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Drained => 0,
            Self::Interrupted => 130,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding the PID file, task queue, and health counters.
    pub state_dir: PathBuf,
    /// Tick interval of the daemon loop.
    pub tick: Duration,
    /// Maximum concurrently running agent tasks.
    pub max_concurrent_runs: usize,
    /// Memory limit feeding the degraded verdict.
    pub memory_limit_mb: u64,
    /// Bounded history length of the scheduler.
    pub history_limit: usize,
    /// Backpressure high-water mark of the scheduler.
    pub high_water_mark: usize,
    /// Drain the queue once and exit instead of running until interrupted.
    pub oneshot: bool,
}

impl DaemonConfig {
    /// Defaults rooted at `state_dir`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            tick: Duration::from_millis(500),
            max_concurrent_runs: 1,
            memory_limit_mb: 512,
            history_limit: 100,
            high_water_mark: 1000,
            oneshot: false,
        }
    }
}

/// The PID file guard: held for the daemon's lifetime.
#[derive(Debug)]
pub struct PidGuard {
    path: PathBuf,
    _file: File,
}

impl PidGuard {
    /// Write the current pid to `path` and lock it exclusively.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when another live process holds the
    /// lock, and a storage error on filesystem failures.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AgentError::storage(path.display().to_string(), e.to_string()))?;
        file.try_lock_exclusive().map_err(|_| {
            AgentError::config(format!(
                "another daemon instance is running (PID file {} is locked)",
                path.display()
            ))
        })?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        info!(path = %path.display(), pid = std::process::id(), "PID file written");
        Ok(Self { path: path.to_owned(), _file: file })
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove PID file");
        }
    }
}

/// The persistent task runtime host.
pub struct Daemon {
    config: DaemonConfig,
    scheduler: SharedScheduler,
    triggers: TriggerManager,
    health: HealthMonitor,
    events: Arc<EventBus>,
    factory: AgentFactory,
}

impl Daemon {
    /// Build a daemon rooted at the configured state directory.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the persisted task queue exists but is
    /// corrupt.
    pub fn new(config: DaemonConfig, factory: AgentFactory) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;
        let scheduler = TaskScheduler::new()
            .with_history_limit(config.history_limit)
            .with_high_water_mark(config.high_water_mark)
            .with_path(config.state_dir.join("task-queue.json"))?;
        let scheduler: SharedScheduler = Arc::new(Mutex::new(scheduler));
        let events = Arc::new(EventBus::new());
        let health = HealthMonitor::new(config.tick, config.memory_limit_mb)
            .with_path(config.state_dir.join("health.json"));
        let triggers = TriggerManager::new(Arc::clone(&scheduler), Arc::clone(&events));
        Ok(Self { config, scheduler, triggers, health, events, factory })
    }

    /// The shared scheduler handle.
    #[must_use]
    pub fn scheduler(&self) -> SharedScheduler {
        Arc::clone(&self.scheduler)
    }

    /// The daemon-wide event bus.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// The trigger manager.
    pub fn triggers_mut(&mut self) -> &mut TriggerManager {
        &mut self.triggers
    }

    /// The health monitor.
    #[must_use]
    pub const fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Run until interrupted (or, in one-shot mode, until drained).
    ///
    /// # Errors
    ///
    /// Returns a configuration error when another instance holds the PID
    /// file.
    pub async fn run(self) -> Result<DaemonOutcome> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "interrupt listener failed, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run with an explicit shutdown future, for embedding and tests.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when another instance holds the PID
    /// file.
    pub async fn run_with_shutdown(
        mut self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<DaemonOutcome> {
        let pid = PidGuard::acquire(&self.config.state_dir.join("daemon.pid"))?;
        info!(state_dir = %self.config.state_dir.display(), "daemon starting");

        let mut ticker = tokio::time::interval(self.config.tick);
        let mut active: JoinSet<(String, Result<RunReport>)> = JoinSet::new();
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                () = &mut shutdown => break DaemonOutcome::Interrupted,
                _ = ticker.tick() => {
                    self.health.beat();
                    self.reap(&mut active);
                    self.launch(&mut active);
                    let queue_length = self
                        .scheduler
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .pending_len();
                    let _ = self.health.snapshot(queue_length);
                    if self.config.oneshot && active.is_empty() && queue_length == 0 {
                        break DaemonOutcome::Drained;
                    }
                }
            }
        };

        // Graceful shutdown: stop the trigger timers first, then abandon
        // in-flight tasks — they stay `running` in the persisted queue and
        // crash recovery re-enqueues them on the next start.
        self.triggers.stop_all();
        active.abort_all();
        drop(pid);
        info!(?outcome, "daemon stopped");
        Ok(outcome)
    }

    fn reap(&self, active: &mut JoinSet<(String, Result<RunReport>)>) {
        while let Some(joined) = active.try_join_next() {
            match joined {
                Ok((task_id, Ok(report))) => {
                    self.with_scheduler(|s| s.complete(&task_id, report.step_count));
                    self.health.record_task(true);
                }
                Ok((task_id, Err(e))) => {
                    warn!(task_id, error = %e, "task run failed");
                    self.with_scheduler(|s| s.fail(&task_id, e.to_string()));
                    self.health.record_task(false);
                }
                Err(e) => warn!(error = %e, "task join failed"),
            }
        }
    }

    fn launch(&self, active: &mut JoinSet<(String, Result<RunReport>)>) {
        while active.len() < self.config.max_concurrent_runs {
            let Some(task) = self.with_scheduler(TaskScheduler::dequeue) else {
                break;
            };
            match (self.factory)(&task) {
                Ok(mut agent) => {
                    info!(task_id = %task.id, goal = %task.goal, "launching task");
                    let task_id = task.id.clone();
                    active.spawn(async move { (task_id, agent.run().await) });
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "agent construction failed");
                    self.with_scheduler(|s| s.fail(&task.id, e.to_string()));
                    self.health.record_task(false);
                }
            }
        }
    }

    fn with_scheduler<R>(&self, f: impl FnOnce(&mut TaskScheduler) -> R) -> R {
        let mut scheduler =
            self.scheduler.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut scheduler)
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::{Goal, ZenAgentConfig};
    use crate::llm::mock::ScriptedLlm;
    use crate::runtime::scheduler::TaskStatus;

    fn scripted_factory() -> AgentFactory {
        Box::new(|task| {
            let llm = Arc::new(ScriptedLlm::new());
            let mut config = ZenAgentConfig::new(Goal::new(&task.goal), llm);
            if let Some(max_steps) = task.max_steps {
                config = config.with_max_steps(max_steps);
            }
            ZenAgent::new(config)
        })
    }

    fn fast_config(dir: &Path) -> DaemonConfig {
        let mut config = DaemonConfig::new(dir);
        config.tick = Duration::from_millis(10);
        config.oneshot = true;
        config
    }

    #[test]
    fn pid_guard_rejects_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let guard = PidGuard::acquire(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());

        let second = PidGuard::acquire(&path);
        assert!(matches!(second, Err(AgentError::Config { .. })));

        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oneshot_drains_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(fast_config(dir.path()), scripted_factory()).unwrap();
        let scheduler = daemon.scheduler();
        scheduler
            .lock()
            .unwrap()
            .enqueue(TaskDef::new("empty-script goal", 1));

        let outcome = daemon.run_with_shutdown(std::future::pending()).await.unwrap();
        assert_eq!(outcome, DaemonOutcome::Drained);
        assert_eq!(outcome.exit_code(), 0);

        let scheduler = scheduler.lock().unwrap();
        assert_eq!(scheduler.pending_len(), 0);
        let history = scheduler.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Done);
        assert!(!dir.path().join("daemon.pid").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_future_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.oneshot = false;
        let daemon = Daemon::new(config, scripted_factory()).unwrap();

        let outcome = daemon
            .run_with_shutdown(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(outcome, DaemonOutcome::Interrupted);
        assert_eq!(outcome.exit_code(), 130);
        assert!(!dir.path().join("daemon.pid").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn factory_failure_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let factory: AgentFactory =
            Box::new(|_| Err(AgentError::config("no adapter configured")));
        let daemon = Daemon::new(fast_config(dir.path()), factory).unwrap();
        let scheduler = daemon.scheduler();
        scheduler.lock().unwrap().enqueue(TaskDef::new("doomed", 1));

        daemon.run_with_shutdown(std::future::pending()).await.unwrap();

        let history = scheduler.lock().unwrap().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Failed);
        assert!(history[0].error.as_deref().unwrap().contains("no adapter"));
        assert_eq!(daemon_counters(dir.path()).tasks_failed, 1);
    }

    fn daemon_counters(dir: &Path) -> crate::runtime::health::HealthCounters {
        serde_json::from_str(&std::fs::read_to_string(dir.join("health.json")).unwrap()).unwrap()
    }
}
