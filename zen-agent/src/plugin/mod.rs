//! The plugin hook bus: ordered, typed lifecycle hooks.
//!
//! Plugins observe and alter the agent loop through one method per hook;
//! unused methods default to no-ops, so implementations only override what
//! they care about. The registry is ordered — hooks run in plugin
//! registration order — and immutable during a run.
//!
//! Hook contracts:
//!
//! - `after_delta` may veto the step; the first veto wins;
//! - `before_decide` contributes prompt fragments, appended in registration
//!   order;
//! - `before_action` may fail; the error is routed through `on_error` and
//!   the action is skipped (counted as a tool failure);
//! - `after_action` and `on_evolution` are fire-and-forget: their errors
//!   are logged and swallowed.

pub mod dana;
pub mod forge;
pub mod prajna;
pub mod resilience;
pub mod sila;

pub use dana::{DanaPlugin, KnowledgeGift, KnowledgePacket};
pub use forge::ForgePlugin;
pub use prajna::PrajnaPlugin;
pub use resilience::ResiliencePlugin;
pub use sila::{SilaPlugin, SilaRule};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::agent::ZenAgent;
use crate::agent::state::{Action, Delta, RunStatus};
use crate::error::{AgentError, Result};
use crate::store::{FailureEntry, KarmaEntry};
use crate::tool::ToolResult;

/// A veto returned from `after_delta`.
#[derive(Debug, Clone)]
pub struct Veto {
    /// Why the step was vetoed.
    pub reason: String,
}

impl Veto {
    /// Create a veto.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Cheap per-step context handed to every hook.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// 1-based step number.
    pub step: usize,
    /// Step budget of the run.
    pub max_steps: usize,
    /// The goal description.
    pub goal: String,
    /// Id of the running agent.
    pub agent_id: String,
}

/// End-of-run summary dispatched to `on_evolution`.
#[derive(Debug, Clone)]
pub struct EvolutionReport {
    /// Id of the agent that ran.
    pub agent_id: String,
    /// The goal that was pursued.
    pub goal: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Steps executed.
    pub step_count: usize,
    /// Failures recorded during the run.
    pub new_failures: Vec<FailureEntry>,
    /// Habitual karma patterns (occurrences ≥ 3) at run end.
    pub habitual_patterns: Vec<KarmaEntry>,
    /// Strategies that worked, for knowledge sharing.
    pub strategies: Vec<String>,
    /// One-line summary of what the run learned.
    pub summary: String,
}

/// The lifecycle hook contract.
///
/// Object-safe; agents hold plugins as `Arc<dyn Plugin>`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name of the plugin, for logs.
    fn name(&self) -> &str;

    /// Runs once at attach time. May register tools and event listeners.
    async fn install(&self, _agent: &mut ZenAgent) -> Result<()> {
        Ok(())
    }

    /// Contribute context lines to the observe prompt.
    async fn before_observe(&self, _ctx: &StepContext) -> Vec<String> {
        Vec::new()
    }

    /// Inspect the computed delta; return a veto to abort the step.
    async fn after_delta(&self, _ctx: &StepContext, _delta: &Delta) -> Option<Veto> {
        None
    }

    /// Contribute prompt fragments to the decision prompt.
    async fn before_decide(&self, _ctx: &StepContext) -> Vec<String> {
        Vec::new()
    }

    /// Gate an action. An error skips the action and is routed to
    /// [`on_error`](Self::on_error).
    async fn before_action(&self, _ctx: &StepContext, _action: &Action) -> Result<()> {
        Ok(())
    }

    /// Observe a completed action. Errors are logged and swallowed.
    async fn after_action(
        &self,
        _ctx: &StepContext,
        _action: &Action,
        _result: &ToolResult,
    ) -> Result<()> {
        Ok(())
    }

    /// Observe an error raised during the step.
    async fn on_error(&self, _ctx: &StepContext, _error: &AgentError) {}

    /// Observe the end-of-run evolution report. Errors are logged and
    /// swallowed.
    async fn on_evolution(&self, _report: &EvolutionReport) -> Result<()> {
        Ok(())
    }
}

/// The ordered plugin registry.
#[derive(Default)]
pub struct PluginBus {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin. Order of registration is order of dispatch.
    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the bus is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Collect observe-context lines from every plugin, in order.
    pub async fn before_observe(&self, ctx: &StepContext) -> Vec<String> {
        let mut lines = Vec::new();
        for plugin in &self.plugins {
            lines.extend(plugin.before_observe(ctx).await);
        }
        lines
    }

    /// Run `after_delta` hooks; the first veto aborts the sweep.
    pub async fn after_delta(&self, ctx: &StepContext, delta: &Delta) -> Option<(String, Veto)> {
        for plugin in &self.plugins {
            if let Some(veto) = plugin.after_delta(ctx, delta).await {
                return Some((plugin.name().to_owned(), veto));
            }
        }
        None
    }

    /// Collect decision prompt fragments from every plugin, in order.
    pub async fn before_decide(&self, ctx: &StepContext) -> Vec<String> {
        let mut fragments = Vec::new();
        for plugin in &self.plugins {
            fragments.extend(plugin.before_decide(ctx).await);
        }
        fragments
    }

    /// Run `before_action` hooks; the first error aborts the sweep.
    ///
    /// # Errors
    ///
    /// Propagates the first plugin error.
    pub async fn before_action(&self, ctx: &StepContext, action: &Action) -> Result<()> {
        for plugin in &self.plugins {
            plugin.before_action(ctx, action).await?;
        }
        Ok(())
    }

    /// Run `after_action` hooks. Errors are logged and swallowed.
    pub async fn after_action(&self, ctx: &StepContext, action: &Action, result: &ToolResult) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.after_action(ctx, action, result).await {
                warn!(plugin = plugin.name(), error = %e, "after_action hook failed");
            }
        }
    }

    /// Run `on_error` hooks.
    pub async fn on_error(&self, ctx: &StepContext, error: &AgentError) {
        for plugin in &self.plugins {
            plugin.on_error(ctx, error).await;
        }
    }

    /// Run `on_evolution` hooks. Errors are logged and swallowed.
    pub async fn on_evolution(&self, report: &EvolutionReport) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_evolution(report).await {
                warn!(plugin = plugin.name(), error = %e, "on_evolution hook failed");
            }
        }
    }
}

impl std::fmt::Debug for PluginBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("PluginBus").field("plugins", &names).finish()
    }
}
