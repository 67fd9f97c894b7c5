//! The per-step state machine: observe → delta → decide → act → learn.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::event::AgentEvent;
use crate::llm::{ChatOptions, ChatResponse};
use crate::message::ChatMessage;
use crate::plugin::StepContext;
use crate::store::{FailureEntry, KarmaEntry, KarmaType, Severity};
use crate::tool::ToolResult;
use crate::usage::TokenUsage;

use super::json_util::extract_typed;
use super::state::{Action, Delta, RunReport, RunState, RunStatus};
use super::{ZenAgent, prompts};

/// Verdict of the causal-analysis call over two consecutive failures.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CausalVerdict {
    pub is_causal: bool,
    pub strength: f32,
    pub reasoning: String,
}

impl Default for CausalVerdict {
    fn default() -> Self {
        Self { is_causal: false, strength: 0.0, reasoning: String::new() }
    }
}

enum StepOutcome {
    Continue,
    Terminate(RunStatus),
}

impl ZenAgent {
    /// Drive the goal until a termination condition fires.
    ///
    /// # Errors
    ///
    /// Hard errors (model transport failures, storage corruption) propagate
    /// after an `agent:stopped` event; normal terminations — including max
    /// steps and veto exhaustion — return a report.
    pub async fn run(&mut self) -> Result<RunReport> {
        self.reset_run();
        info!(goal = %self.goal.description, "run starting");
        self.events.emit(&AgentEvent::Start { goal: self.goal.description.clone() });

        let status = loop {
            if self.stop_flag.load(std::sync::atomic::Ordering::SeqCst) {
                self.events
                    .emit(&AgentEvent::Stopped { reason: "stop requested".to_owned() });
                break RunStatus::Stopped;
            }
            match self.step().await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Terminate(status)) => break status,
                Err(e) => {
                    warn!(error = %e, "run aborted by hard error");
                    self.events.emit(&AgentEvent::Stopped { reason: e.to_string() });
                    self.finish_run(RunStatus::Failed).await;
                    return Err(e);
                }
            }
        };

        Ok(self.finish_run(status).await)
    }

    /// Execute one loop step.
    async fn step(&mut self) -> Result<StepOutcome> {
        let step = self.state.step_count + 1;
        let ctx = self.step_context(step);
        self.events.emit(&AgentEvent::StepStart { n: step });

        // OBSERVE → COMPUTE_DELTA
        let hints = self.plugins.before_observe(&ctx).await;
        let mut delta = match self.compute_delta(&hints).await {
            Ok(delta) => delta,
            Err(e @ AgentError::Protocol { .. }) => {
                warn!(step, error = %e, "delta failed after repair attempt, failing the step");
                self.plugins.on_error(&ctx, &e).await;
                return Ok(self.end_step(step));
            }
            Err(e) => return Err(e),
        };
        self.events.emit(&AgentEvent::DeltaComputed { delta: delta.clone() });
        if delta.suffering_delta.is_some() || delta.ego_noise.is_some() {
            self.events.emit(&AgentEvent::DukkhaEvaluated {
                suffering_delta: delta.suffering_delta.unwrap_or(0.0),
                ego_noise: delta.ego_noise.unwrap_or(0.0),
            });
        }

        // EVALUATE — afterDelta hooks may veto
        if let Some((plugin, veto)) = self.plugins.after_delta(&ctx, &delta).await {
            warn!(step, plugin = %plugin, reason = %veto.reason, "step vetoed");
            self.veto_count += 1;
            if self.veto_count >= self.max_vetoes {
                self.events.emit(&AgentEvent::StepEnd { n: step });
                return Ok(StepOutcome::Terminate(RunStatus::Vetoed));
            }
            return Ok(self.end_step(step));
        }

        // Progress is monotonically nondecreasing within a milestone.
        delta.progress = delta.progress.clamp(0.0, 1.0);
        if let Some(previous) = &self.state.delta {
            delta.progress = delta.progress.max(previous.progress);
        }
        self.state.delta = Some(delta.clone());

        if delta.is_complete {
            return Ok(self.advance_milestone(step).await);
        }

        // DECIDE
        let fragments = self.plugins.before_decide(&ctx).await;
        let response = if self.karma_store.is_some() {
            self.awakened_decide(&delta, &fragments).await?
        } else {
            self.chat_decide(&delta, &fragments, None).await?
        };
        if self.stop_flag.load(std::sync::atomic::Ordering::SeqCst) {
            self.events.emit(&AgentEvent::Stopped { reason: "stop requested".to_owned() });
            return Ok(StepOutcome::Terminate(RunStatus::Stopped));
        }
        let Some(call) = response.tool_calls.first() else {
            debug!(step, "model returned no tool calls, declaring the goal done");
            self.events.emit(&AgentEvent::StepEnd { n: step });
            return Ok(StepOutcome::Terminate(RunStatus::Done));
        };
        let action = Action {
            tool_name: call.name.clone(),
            parameters: call.arguments_object(),
            rationale: response.content.clone(),
        };

        // ACT — beforeAction may reject; the action is then skipped and
        // counted as a tool failure.
        let result = match self.plugins.before_action(&ctx, &action).await {
            Ok(()) => self.execute_with_retry(&action).await,
            Err(e) => {
                self.plugins.on_error(&ctx, &e).await;
                ToolResult::fail(e.to_string())
            }
        };
        self.history.push(ChatMessage::tool(call.id.clone(), result.to_observation()));

        self.events.emit(&AgentEvent::ActionComplete {
            action: action.clone(),
            result: result.clone(),
            step,
        });
        // Tools advertise durable artifacts with an `artifact: true` marker
        // in their output.
        if result.success
            && result.output.get("artifact").and_then(Value::as_bool) == Some(true)
        {
            self.events.emit(&AgentEvent::ArtifactCreated {
                tool_name: action.tool_name.clone(),
                step,
                file_path: result
                    .output
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                description: format!("artifact produced by {}", action.tool_name),
            });
        }
        self.plugins.after_action(&ctx, &action, &result).await;

        // LEARN
        if result.success {
            self.tanha.clear();
            self.consecutive_failures = 0;
            self.last_failure_karma = None;
            let strategy = format!("tool '{}' works here", action.tool_name);
            if !self.run_strategies.contains(&strategy) {
                self.run_strategies.push(strategy);
            }
        } else {
            self.learn_from_failure(&ctx, &action, &result).await;
        }

        if let Some(snapshot) = &self.snapshot {
            snapshot(&self.state);
        }
        Ok(self.end_step(step))
    }

    /// Count the step, emit `step:end`, and check the step budget.
    fn end_step(&mut self, step: usize) -> StepOutcome {
        self.events.emit(&AgentEvent::StepEnd { n: step });
        self.state.step_count += 1;
        if self.state.step_count >= self.max_steps {
            info!(steps = self.state.step_count, "step budget exhausted");
            StepOutcome::Terminate(RunStatus::Failed)
        } else {
            StepOutcome::Continue
        }
    }

    fn reset_run(&mut self) {
        self.state = RunState::new(self.goal.clone(), self.milestones.clone());
        self.history = vec![ChatMessage::system(prompts::system(&self.state, &[]))];
        self.stop_flag.store(false, std::sync::atomic::Ordering::SeqCst);
        self.tanha.clear();
        self.veto_count = 0;
        self.alternative_needed = false;
        self.last_failure_karma = None;
        self.consecutive_failures = 0;
        self.run_strategies.clear();
        if let Some(failures) = &mut self.failure_store {
            failures.clear_current_session();
        }
    }

    /// Build the observe prompt, run `complete`, and parse the delta, with
    /// one repair attempt for invalid JSON.
    async fn compute_delta(&mut self, hints: &[String]) -> Result<Delta> {
        let prompt = prompts::observe(&self.state, &self.history, hints);
        let raw = self.llm.complete(&prompt).await?;
        if let Some(delta) = extract_typed::<Delta>(&raw) {
            return Ok(delta);
        }
        debug!("delta was not valid JSON, attempting repair");
        let repaired = self.llm.complete(&prompts::repair(&raw)).await?;
        extract_typed::<Delta>(&repaired)
            .ok_or_else(|| AgentError::protocol(repaired, "invalid delta JSON after repair"))
    }

    /// Milestone advance: either terminate or reset context and continue.
    ///
    /// The step that completes a milestone does not count against the step
    /// budget.
    async fn advance_milestone(&mut self, step: usize) -> StepOutcome {
        let Some(milestone) = self.state.current_milestone() else {
            self.events.emit(&AgentEvent::StepEnd { n: step });
            return StepOutcome::Terminate(RunStatus::Done);
        };
        let milestone_id = milestone.id.clone();
        info!(milestone = %milestone.description, "milestone reached");
        self.events.emit(&AgentEvent::MilestoneReached { milestone_id });
        self.state.current_milestone_index += 1;

        if self.state.current_milestone_index >= self.state.milestones.len() {
            self.events.emit(&AgentEvent::StepEnd { n: step });
            return StepOutcome::Terminate(RunStatus::Done);
        }

        // Context Reset: truncate history to one system message derived
        // from the goal, the remaining milestones, and carried-forward
        // failures. Skills, karma, and hierarchical memory persist.
        let carried = self
            .failure_store
            .as_ref()
            .map(|failures| failures.export_current())
            .unwrap_or_default();
        if let Some(failures) = &mut self.failure_store {
            failures.clear_current_session();
        }
        self.history = vec![ChatMessage::system(prompts::system(&self.state, &carried))];
        self.state.delta = None;
        self.events.emit(&AgentEvent::ContextReset);
        self.events.emit(&AgentEvent::StepEnd { n: step });
        StepOutcome::Continue
    }

    /// Append the decision prompt, run the tool-aware chat, and record the
    /// assistant's reply in history.
    pub(crate) async fn chat_decide(
        &mut self,
        delta: &Delta,
        fragments: &[String],
        strategies: Option<&[String]>,
    ) -> Result<ChatResponse> {
        let alternative = std::mem::take(&mut self.alternative_needed);
        let prompt = prompts::decide(delta, fragments, alternative, strategies);
        self.history.push(ChatMessage::user(prompt));

        let options = ChatOptions::new().with_tools(self.tools.specs());
        let response = self.llm.chat(&self.history, options).await?;
        self.absorb_usage(response.usage);

        let content = response.content.clone().unwrap_or_default();
        if response.tool_calls.is_empty() {
            self.history.push(ChatMessage::assistant(content));
        } else {
            self.history
                .push(ChatMessage::assistant_calls(content, response.tool_calls.clone()));
        }
        Ok(response)
    }

    /// Accumulate usage and cost for one model call.
    pub(crate) fn absorb_usage(&mut self, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            self.state.usage += usage;
            self.state.cost += self.cost_table.cost_of(self.llm.model_id(), usage);
        }
    }

    /// Execute the action, retrying transient failures under the policy.
    async fn execute_with_retry(&self, action: &Action) -> ToolResult {
        let mut result = self.tools.execute(&action.tool_name, action.parameters.clone()).await;
        let mut attempt = 0;
        while !result.success && !result.is_permanent_failure() {
            let Some(delay) = self.retry.delay(attempt) else {
                break;
            };
            debug!(tool = %action.tool_name, attempt, "retrying after {:?}", delay);
            tokio::time::sleep(delay).await;
            result = self.tools.execute(&action.tool_name, action.parameters.clone()).await;
            attempt += 1;
        }
        result
    }

    /// Tanha bookkeeping, proverb derivation, and failure/karma storage.
    async fn learn_from_failure(&mut self, ctx: &StepContext, action: &Action, result: &ToolResult) {
        let mut signature = result.error.clone().unwrap_or_else(|| "unknown".to_owned());
        if signature.len() > 80 {
            signature.truncate(80);
        }
        let pattern = format!("{}:{signature}", action.tool_name);
        let count = self.tanha.remove(&pattern).unwrap_or(0) + 1;
        self.tanha.clear();
        if count >= 3 {
            self.events
                .emit(&AgentEvent::TanhaLoopDetected { pattern: pattern.clone(), count });
            self.alternative_needed = true;
        } else {
            self.tanha.insert(pattern, count);
        }

        let proverb = format!(
            "When '{}' fails with '{signature}', change the approach instead of repeating it",
            action.tool_name
        );
        let condition = format!("pursuing: {} (step {})", ctx.goal, ctx.step);
        self.state.failures.push(proverb.clone());
        self.events.emit(&AgentEvent::FailureRecorded {
            proverb: proverb.clone(),
            condition: condition.clone(),
        });
        if let Some(failures) = &mut self.failure_store
            && let Err(e) = failures
                .store(FailureEntry::new(proverb.clone(), condition.clone(), Severity::Med))
                .await
        {
            warn!(error = %e, "failed to store failure entry");
        }

        self.consecutive_failures += 1;
        if let Some(karma) = self.karma_store.as_mut() {
            let entry = KarmaEntry::new(
                proverb.clone(),
                condition.clone(),
                Severity::Med,
                action.tool_name.clone(),
                KarmaType::Unskillful,
            );
            let stored = karma.store(entry).await;
            match stored {
                Ok(karma_id) => {
                    let chain = self
                        .karma_store
                        .as_ref()
                        .and_then(|karma| karma.get(&karma_id))
                        .map(|entry| entry.causal_chain.clone())
                        .unwrap_or_default();
                    self.events.emit(&AgentEvent::KarmaStored {
                        karma_id: karma_id.clone(),
                        karma_type: KarmaType::Unskillful,
                        causal_chain: chain,
                    });
                    if self.consecutive_failures >= 2
                        && let Some(earlier) = self.last_failure_karma.clone()
                        && earlier != karma_id
                    {
                        self.analyze_causality(&earlier, &karma_id).await;
                    }
                    self.last_failure_karma = Some(karma_id);
                }
                Err(e) => warn!(error = %e, "failed to store karma entry"),
            }
        }
    }

    /// Ask the model whether two consecutive failures are causally linked.
    async fn analyze_causality(&mut self, earlier_id: &str, later_id: &str) {
        let Some((earlier, later)) = self.karma_store.as_ref().and_then(|karma| {
            Some((karma.get(earlier_id)?.clone(), karma.get(later_id)?.clone()))
        }) else {
            return;
        };
        let prompt = prompts::causal(&earlier, &later);
        let raw = match self.llm.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "causal analysis call failed");
                return;
            }
        };
        let Some(verdict) = extract_typed::<CausalVerdict>(&raw) else {
            debug!("causal analysis reply was not JSON, skipping");
            return;
        };
        if verdict.is_causal {
            debug!(strength = verdict.strength, reasoning = %verdict.reasoning, "causal link");
            let linked = self
                .karma_store
                .as_mut()
                .is_some_and(|karma| karma.link_causal(later_id, earlier_id));
            if linked {
                self.events.emit(&AgentEvent::CausalAnalyzed { links: 1 });
            }
        }
    }

    /// Impermanence, the evolution report, and the terminal event.
    async fn finish_run(&mut self, status: RunStatus) -> RunReport {
        if let Some(karma) = &mut self.karma_store {
            karma.apply_impermanence(self.impermanence_rate);
            self.state.karma_metrics = Some(karma.metrics());
        }

        let report = crate::plugin::EvolutionReport {
            agent_id: self.id.clone(),
            goal: self.goal.description.clone(),
            status,
            step_count: self.state.step_count,
            new_failures: self
                .failure_store
                .as_ref()
                .map(|failures| failures.export_current())
                .unwrap_or_default(),
            habitual_patterns: self
                .karma_store
                .as_ref()
                .map(|karma| karma.habitual_patterns(3))
                .unwrap_or_default(),
            strategies: self.run_strategies.clone(),
            summary: format!(
                "run ended {status} after {} steps at progress {:.2}",
                self.state.step_count,
                self.state.progress()
            ),
        };
        self.plugins.on_evolution(&report).await;

        info!(
            %status,
            steps = self.state.step_count,
            cost = self.state.cost,
            "run finished"
        );
        self.events.emit(&AgentEvent::Complete {
            status,
            step_count: self.state.step_count,
            progress: self.state.progress(),
            cost: self.state.cost,
            usage: self.state.usage,
        });
        RunReport {
            status,
            step_count: self.state.step_count,
            progress: self.state.progress(),
            usage: self.state.usage,
            cost: self.state.cost,
        }
    }
}
