//! The agent: configuration, construction, and the per-step loop.
//!
//! A [`ZenAgent`] is built from a [`ZenAgentConfig`] and drives one goal to
//! completion per [`run`](ZenAgent::run) call. The loop itself lives in
//! [`executor`]; the multi-stage decision pipeline in [`awakening`].

pub mod awakening;
pub mod executor;
pub mod json_util;
pub mod prompts;
pub mod state;

pub use state::{Goal, Milestone, RunReport, RunState, RunStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::event::EventBus;
use crate::llm::LlmClient;
use crate::message::ChatMessage;
use crate::plugin::{Plugin, PluginBus, StepContext};
use crate::resilience::RetryPolicy;
use crate::store::{FailureStore, KarmaStore, SkillStore};
use crate::tool::{Tool, ToolRegistry};
use crate::usage::CostTable;

/// Callback invoked with the run state after every step.
pub type SnapshotFn = Box<dyn Fn(&RunState) + Send + Sync>;

/// Configuration for a [`ZenAgent`].
///
/// `goal` and `llm` are required; everything else has defaults.
pub struct ZenAgentConfig {
    /// The goal to pursue.
    pub goal: Goal,
    /// The language model adapter.
    pub llm: Arc<dyn LlmClient>,
    /// Tools available to the agent.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Milestones, in order. Empty means one milestone derived from the goal.
    pub milestones: Vec<Milestone>,
    /// Step budget.
    pub max_steps: usize,
    /// Veto budget; reaching it terminates the run with status `vetoed`.
    pub max_vetoes: u32,
    /// Retry policy for transient tool failures.
    pub retry: RetryPolicy,
    /// Karma decay applied once at the end of each run.
    pub impermanence_rate: f32,
    /// Skill store shared across runs.
    pub skill_store: Option<SkillStore>,
    /// Failure store shared across runs.
    pub failure_store: Option<FailureStore>,
    /// Karma store; configuring one activates the awakening pipeline.
    pub karma_store: Option<KarmaStore>,
    /// Per-model price table for cost accounting.
    pub cost_table: CostTable,
    /// Optional per-step state snapshot hook.
    pub snapshot: Option<SnapshotFn>,
    /// External packages to acquire at build, with their manifest
    /// directory. Empty means the acquisition subsystem is disabled.
    pub acquisitions: Vec<(String, std::path::PathBuf)>,
}

impl ZenAgentConfig {
    /// Create a config with defaults for everything but goal and model.
    #[must_use]
    pub fn new(goal: Goal, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            goal,
            llm,
            tools: Vec::new(),
            milestones: Vec::new(),
            max_steps: 30,
            max_vetoes: 5,
            retry: RetryPolicy::default(),
            impermanence_rate: 0.05,
            skill_store: None,
            failure_store: None,
            karma_store: None,
            cost_table: CostTable::new(),
            snapshot: None,
            acquisitions: Vec::new(),
        }
    }

    /// Add a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Set the milestone list.
    #[must_use]
    pub fn with_milestones(mut self, milestones: Vec<Milestone>) -> Self {
        self.milestones = milestones;
        self
    }

    /// Set the step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the veto budget.
    #[must_use]
    pub const fn with_max_vetoes(mut self, max_vetoes: u32) -> Self {
        self.max_vetoes = max_vetoes;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the karma decay rate.
    #[must_use]
    pub const fn with_impermanence_rate(mut self, rate: f32) -> Self {
        self.impermanence_rate = rate;
        self
    }

    /// Attach a skill store.
    #[must_use]
    pub fn with_skill_store(mut self, store: SkillStore) -> Self {
        self.skill_store = Some(store);
        self
    }

    /// Attach a failure store.
    #[must_use]
    pub fn with_failure_store(mut self, store: FailureStore) -> Self {
        self.failure_store = Some(store);
        self
    }

    /// Attach a karma store, activating the awakening pipeline.
    #[must_use]
    pub fn with_karma_store(mut self, store: KarmaStore) -> Self {
        self.karma_store = Some(store);
        self
    }

    /// Set the cost table.
    #[must_use]
    pub fn with_cost_table(mut self, table: CostTable) -> Self {
        self.cost_table = table;
        self
    }

    /// Set the per-step snapshot hook.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotFn) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Enable acquisition of one external capability. The wrapper tool is
    /// registered at construction and its manifest written under `dir`.
    #[must_use]
    pub fn with_acquisition(
        mut self,
        package: impl Into<String>,
        dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        self.acquisitions.push((package.into(), dir.into()));
        self
    }
}

impl std::fmt::Debug for ZenAgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenAgentConfig")
            .field("goal", &self.goal.description)
            .field("tools", &self.tools.len())
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

/// Handle for cooperative cancellation of a run.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the run to stop at the next state transition.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// An autonomous goal-driven agent.
pub struct ZenAgent {
    pub(crate) id: String,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) tools: ToolRegistry,
    pub(crate) plugins: PluginBus,
    pub(crate) events: Arc<EventBus>,
    pub(crate) goal: Goal,
    pub(crate) milestones: Vec<Milestone>,
    pub(crate) max_steps: usize,
    pub(crate) max_vetoes: u32,
    pub(crate) retry: RetryPolicy,
    pub(crate) impermanence_rate: f32,
    pub(crate) skill_store: Option<SkillStore>,
    pub(crate) failure_store: Option<FailureStore>,
    pub(crate) karma_store: Option<KarmaStore>,
    pub(crate) cost_table: CostTable,
    pub(crate) snapshot: Option<SnapshotFn>,
    pub(crate) state: RunState,
    pub(crate) history: Vec<ChatMessage>,
    pub(crate) stop_flag: Arc<AtomicBool>,
    pub(crate) tanha: std::collections::HashMap<String, u32>,
    pub(crate) veto_count: u32,
    pub(crate) alternative_needed: bool,
    pub(crate) last_failure_karma: Option<String>,
    pub(crate) consecutive_failures: u32,
    pub(crate) run_strategies: Vec<String>,
}

impl ZenAgent {
    /// Build an agent from a config.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty goal or duplicate tool
    /// names.
    pub fn new(config: ZenAgentConfig) -> Result<Self> {
        if config.goal.description.trim().is_empty() {
            return Err(AgentError::config("goal description must not be empty"));
        }
        let mut tools = ToolRegistry::new();
        for tool in config.tools {
            tools.register(tool)?;
        }
        for (package, dir) in &config.acquisitions {
            let (_, tool) = crate::tool::acquire::acquire(package, dir)?;
            tools.register(tool)?;
        }
        let milestones = if config.milestones.is_empty() {
            vec![Milestone::new(format!("achieve: {}", config.goal.description))]
        } else {
            config.milestones
        };
        let state = RunState::new(config.goal.clone(), milestones.clone());
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            llm: config.llm,
            tools,
            plugins: PluginBus::new(),
            events: Arc::new(EventBus::new()),
            goal: config.goal,
            milestones,
            max_steps: config.max_steps,
            max_vetoes: config.max_vetoes,
            retry: config.retry,
            impermanence_rate: config.impermanence_rate,
            skill_store: config.skill_store,
            failure_store: config.failure_store,
            karma_store: config.karma_store,
            cost_table: config.cost_table,
            snapshot: config.snapshot,
            state,
            history: Vec::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            tanha: std::collections::HashMap::new(),
            veto_count: 0,
            alternative_needed: false,
            last_failure_karma: None,
            consecutive_failures: 0,
            run_strategies: Vec::new(),
        })
    }

    /// Id of this agent.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// A cancellation handle for the current/next run.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { flag: Arc::clone(&self.stop_flag) }
    }

    /// The run state. Owned and mutated exclusively by the loop.
    #[must_use]
    pub const fn state(&self) -> &RunState {
        &self.state
    }

    /// Register a tool. Unique names are enforced.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on a duplicate name.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.tools.register(tool)
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// Attach a plugin: runs its `install` hook, then appends it to the
    /// bus. The bus must not be mutated during a run.
    ///
    /// # Errors
    ///
    /// Propagates installation failures.
    pub async fn attach_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        plugin.install(self).await?;
        self.plugins.push(plugin);
        Ok(())
    }

    /// Mutable access to the skill store.
    pub fn skill_store_mut(&mut self) -> Option<&mut SkillStore> {
        self.skill_store.as_mut()
    }

    /// Mutable access to the failure store.
    pub fn failure_store_mut(&mut self) -> Option<&mut FailureStore> {
        self.failure_store.as_mut()
    }

    /// Mutable access to the karma store.
    pub fn karma_store_mut(&mut self) -> Option<&mut KarmaStore> {
        self.karma_store.as_mut()
    }

    pub(crate) fn step_context(&self, step: usize) -> StepContext {
        StepContext {
            step,
            max_steps: self.max_steps,
            goal: self.goal.description.clone(),
            agent_id: self.id.clone(),
        }
    }
}

impl std::fmt::Debug for ZenAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenAgent")
            .field("id", &self.id)
            .field("goal", &self.goal.description)
            .field("tools", &self.tools.names())
            .field("step", &self.state.step_count)
            .finish_non_exhaustive()
    }
}
