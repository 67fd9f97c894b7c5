//! The event vocabulary and the synchronous event bus.
//!
//! Event names are stable strings; payload shapes are part of the crate's
//! contract. Emission is synchronous through a local broker: listeners run
//! to completion on the emitting thread, in registration order. Handlers
//! that need real work should post to a worker themselves.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::agent::state::{Action, Delta, RunStatus};
use crate::store::KarmaType;
use crate::tool::ToolResult;
use crate::usage::TokenUsage;

/// Everything the runtime announces.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AgentEvent {
    /// A run began.
    Start {
        /// The goal being pursued.
        goal: String,
    },
    /// A run terminated. Emitted exactly once per run.
    Complete {
        /// Terminal status of the run.
        status: RunStatus,
        /// Steps executed.
        step_count: usize,
        /// Final progress in `[0, 1]`.
        progress: f32,
        /// Accumulated cost in USD.
        cost: f64,
        /// Accumulated token usage.
        usage: TokenUsage,
    },
    /// The run was stopped via its stop handle.
    Stopped {
        /// Why the run stopped.
        reason: String,
    },
    /// A step began.
    StepStart {
        /// 1-based step number.
        n: usize,
    },
    /// A step finished.
    StepEnd {
        /// 1-based step number.
        n: usize,
    },
    /// The observe phase produced a progress delta.
    DeltaComputed {
        /// The computed delta.
        delta: Delta,
    },
    /// A milestone was completed.
    MilestoneReached {
        /// Id of the completed milestone.
        milestone_id: String,
    },
    /// A tool action finished.
    ActionComplete {
        /// The action taken.
        action: Action,
        /// The tool result.
        result: ToolResult,
        /// The step the action belongs to.
        step: usize,
    },
    /// A failure proverb was recorded.
    FailureRecorded {
        /// The derived proverb.
        proverb: String,
        /// The condition it was learned under.
        condition: String,
    },
    /// A karma entry was stored or reinforced.
    KarmaStored {
        /// Id of the stored entry.
        karma_id: String,
        /// Its karma type.
        karma_type: KarmaType,
        /// Its causal chain at storage time.
        causal_chain: Vec<String>,
    },
    /// Causal analysis linked consecutive failures.
    CausalAnalyzed {
        /// Number of links added.
        links: usize,
    },
    /// The same tool failed the same way three times in a row.
    TanhaLoopDetected {
        /// `"tool:errorSignature"` pattern.
        pattern: String,
        /// Consecutive occurrences observed.
        count: u32,
    },
    /// The delta carried suffering/ego readings.
    DukkhaEvaluated {
        /// Change in suffering, in `[0, 1]`.
        suffering_delta: f32,
        /// Ego noise, in `[0, 1]`.
        ego_noise: f32,
    },
    /// An awakening pipeline stage ran.
    AwakeningStage {
        /// Stage name: investigation, mindfulness, equanimity, or fallback.
        stage: String,
        /// Decision confidence, emitted by the equanimity stage.
        confidence: Option<f32>,
    },
    /// Chat history was truncated at a milestone boundary.
    ContextReset,
    /// A tool produced a durable artifact.
    ArtifactCreated {
        /// The producing tool.
        tool_name: String,
        /// The step the artifact was produced in.
        step: usize,
        /// Path of the artifact, when known.
        file_path: Option<String>,
        /// Human-readable description.
        description: String,
    },
    /// A trigger enqueue was dropped at the scheduler's high-water mark.
    Overflow {
        /// Goal of the dropped task.
        goal: String,
    },
}

impl AgentEvent {
    /// The stable event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "agent:start",
            Self::Complete { .. } => "agent:complete",
            Self::Stopped { .. } => "agent:stopped",
            Self::StepStart { .. } => "step:start",
            Self::StepEnd { .. } => "step:end",
            Self::DeltaComputed { .. } => "delta:computed",
            Self::MilestoneReached { .. } => "milestone:reached",
            Self::ActionComplete { .. } => "action:complete",
            Self::FailureRecorded { .. } => "failure:recorded",
            Self::KarmaStored { .. } => "karma:stored",
            Self::CausalAnalyzed { .. } => "causal:analyzed",
            Self::TanhaLoopDetected { .. } => "tanha:loop:detected",
            Self::DukkhaEvaluated { .. } => "dukkha:evaluated",
            Self::AwakeningStage { .. } => "awakening:stage",
            Self::ContextReset => "context:reset",
            Self::ArtifactCreated { .. } => "artifact:created",
            Self::Overflow { .. } => "overflow",
        }
    }

    /// The payload as a JSON value, for listeners that forward events.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Start { goal } => serde_json::json!({"goal": goal}),
            Self::Complete { status, step_count, progress, cost, usage } => serde_json::json!({
                "status": status,
                "stepCount": step_count,
                "progress": progress,
                "cost": cost,
                "usage": usage,
            }),
            Self::Stopped { reason } => serde_json::json!({"reason": reason}),
            Self::StepStart { n } | Self::StepEnd { n } => serde_json::json!({"n": n}),
            Self::DeltaComputed { delta } => serde_json::json!({"delta": delta}),
            Self::MilestoneReached { milestone_id } => {
                serde_json::json!({"milestoneId": milestone_id})
            }
            Self::ActionComplete { action, result, step } => serde_json::json!({
                "action": action,
                "result": result,
                "step": step,
            }),
            Self::FailureRecorded { proverb, condition } => serde_json::json!({
                "proverb": proverb,
                "condition": condition,
            }),
            Self::KarmaStored { karma_id, karma_type, causal_chain } => serde_json::json!({
                "karmaId": karma_id,
                "karmaType": karma_type,
                "causalChain": causal_chain,
            }),
            Self::CausalAnalyzed { links } => serde_json::json!({"links": links}),
            Self::TanhaLoopDetected { pattern, count } => serde_json::json!({
                "pattern": pattern,
                "count": count,
            }),
            Self::DukkhaEvaluated { suffering_delta, ego_noise } => serde_json::json!({
                "sufferingDelta": suffering_delta,
                "egoNoise": ego_noise,
            }),
            Self::AwakeningStage { stage, confidence } => serde_json::json!({
                "stage": stage,
                "confidence": confidence,
            }),
            Self::ContextReset => serde_json::json!({}),
            Self::ArtifactCreated { tool_name, step, file_path, description } => {
                serde_json::json!({
                    "toolName": tool_name,
                    "step": step,
                    "filePath": file_path,
                    "description": description,
                })
            }
            Self::Overflow { goal } => serde_json::json!({"goal": goal}),
        }
    }
}

/// A registered event listener.
pub type Listener = Box<dyn Fn(&AgentEvent) + Send + Sync>;

/// Synchronous local event broker.
///
/// Listeners are invoked in registration order on the emitting thread.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn on(&self, listener: impl Fn(&AgentEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// Emit an event to every listener.
    pub fn emit(&self, event: &AgentEvent) {
        tracing::debug!(event = event.name(), "emit");
        let listeners = self.listeners.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len();
        f.debug_struct("EventBus").field("listeners", &count).finish()
    }
}

/// A listener that records every event, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach this log to a bus.
    pub fn attach(&self, bus: &EventBus) {
        let events = Arc::clone(&self.events);
        bus.on(move |event| {
            events
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());
        });
    }

    /// All recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Names of all recorded events, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(AgentEvent::name).collect()
    }

    /// How many events with this name were recorded.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }
}
