//! Run state and the data types flowing through the agent loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::karma::KarmaMetrics;
use crate::usage::TokenUsage;

/// The goal a run pursues. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    /// What to accomplish.
    pub description: String,
    /// Optional explicit success criteria.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
}

impl Goal {
    /// Create a goal from a description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into(), success_criteria: None }
    }

    /// Attach success criteria.
    #[must_use]
    pub fn with_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.success_criteria = Some(criteria.into());
        self
    }
}

/// A progress checkpoint. A run walks its milestones in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    /// Stable identifier.
    pub id: String,
    /// What reaching this milestone means.
    pub description: String,
    /// Resources relevant to the milestone.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Milestone {
    /// Create a milestone with a generated id.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            resources: Vec::new(),
        }
    }

    /// Attach resources.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }
}

/// The per-step progress assessment produced by the observe phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Delta {
    /// What changed since the last step.
    pub description: String,
    /// Progress toward the current milestone, in `[0, 1]`.
    pub progress: f32,
    /// What is still missing.
    pub gaps: Vec<String>,
    /// Whether the current milestone is complete.
    pub is_complete: bool,
    /// Optional change in suffering, in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffering_delta: Option<f32>,
    /// Optional ego noise, in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ego_noise: Option<f32>,
}

/// A decided tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// The tool to invoke.
    pub tool_name: String,
    /// Arguments for the tool.
    pub parameters: Value,
    /// Why the model chose this action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The goal was reached or the model declared itself done.
    Done,
    /// The run failed (max steps, hard errors).
    Failed,
    /// The veto budget was exhausted.
    Vetoed,
    /// The run was stopped via its stop handle.
    Stopped,
    /// The run was dropped at the scheduler's high-water mark.
    Overflow,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Vetoed => "vetoed",
            Self::Stopped => "stopped",
            Self::Overflow => "overflow",
        };
        f.write_str(s)
    }
}

/// Mutable state of one run. Owned exclusively by the agent loop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// The goal being pursued.
    pub goal: Goal,
    /// The milestones, in order.
    pub milestones: Vec<Milestone>,
    /// Index of the milestone currently being pursued.
    pub current_milestone_index: usize,
    /// Completed steps.
    pub step_count: usize,
    /// The latest delta, if any.
    pub delta: Option<Delta>,
    /// Proverbs recorded this run.
    pub failures: Vec<String>,
    /// Karma store counters, when a karma store is configured.
    pub karma_metrics: Option<KarmaMetrics>,
    /// Accumulated token usage.
    pub usage: TokenUsage,
    /// Accumulated cost in USD.
    pub cost: f64,
}

impl RunState {
    /// Fresh state for a goal and milestone list.
    #[must_use]
    pub fn new(goal: Goal, milestones: Vec<Milestone>) -> Self {
        Self {
            goal,
            milestones,
            current_milestone_index: 0,
            step_count: 0,
            delta: None,
            failures: Vec::new(),
            karma_metrics: None,
            usage: TokenUsage::default(),
            cost: 0.0,
        }
    }

    /// The milestone currently being pursued, if any remain.
    #[must_use]
    pub fn current_milestone(&self) -> Option<&Milestone> {
        self.milestones.get(self.current_milestone_index)
    }

    /// Progress of the latest delta, 0 when none was computed yet.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.delta.as_ref().map_or(0.0, |delta| delta.progress)
    }
}

/// What a finished run reports back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Terminal status.
    pub status: RunStatus,
    /// Steps executed.
    pub step_count: usize,
    /// Final progress in `[0, 1]`.
    pub progress: f32,
    /// Accumulated token usage.
    pub usage: TokenUsage,
    /// Accumulated cost in USD.
    pub cost: f64,
}
