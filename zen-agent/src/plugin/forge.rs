//! Forge plugin: tool synthesis from habitual failure patterns.
//!
//! When a run ends with habitual karma patterns, the plugin asks the model
//! to design a tool blueprint that would break the pattern. Accepted
//! blueprints pass the denylist pre-check and are persisted; the next
//! install pass registers them as sandboxed tools. The registry stays
//! immutable during runs — synthesis only ever takes effect at attach time.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent::ZenAgent;
use crate::agent::json_util::extract_typed;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::tool::forge::{SynthesizedTool, ToolBlueprint, load_blueprints, save_blueprint};

use super::{EvolutionReport, Plugin};

/// Tool synthesis driven by habitual failures.
pub struct ForgePlugin {
    llm: Arc<dyn LlmClient>,
    blueprint_dir: PathBuf,
}

impl ForgePlugin {
    /// Create the plugin, persisting blueprints under `blueprint_dir`.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, blueprint_dir: impl Into<PathBuf>) -> Self {
        Self { llm, blueprint_dir: blueprint_dir.into() }
    }

    fn synthesis_prompt(report: &EvolutionReport) -> String {
        let patterns: Vec<String> = report
            .habitual_patterns
            .iter()
            .map(|karma| format!("- {} (seen {} times)", karma.proverb, karma.occurrences))
            .collect();
        format!(
            "These failure patterns keep recurring:\n{}\n\n\
             Design one small tool that would break the most frequent pattern.\n\
             Reply with JSON only:\n\
             {{\"name\": \"snake_case_name\", \"description\": \"...\", \
             \"parameters\": {{\"type\": \"object\", \"properties\": {{...}}}}, \
             \"implementation\": \"<a single arithmetic/string expression over the parameters>\", \
             \"confidence\": 0.0, \"reason\": \"...\"}}",
            patterns.join("\n")
        )
    }
}

impl std::fmt::Debug for ForgePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgePlugin")
            .field("blueprint_dir", &self.blueprint_dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Plugin for ForgePlugin {
    fn name(&self) -> &str {
        "forge"
    }

    async fn install(&self, agent: &mut ZenAgent) -> Result<()> {
        for blueprint in load_blueprints(&self.blueprint_dir) {
            let name = blueprint.name.clone();
            match SynthesizedTool::new(blueprint) {
                Ok(tool) => {
                    if agent.has_tool(&name) {
                        debug!(tool = %name, "synthesized tool already registered");
                        continue;
                    }
                    agent.add_tool(Arc::new(tool))?;
                    info!(tool = %name, "registered synthesized tool");
                }
                Err(e) => warn!(tool = %name, error = %e, "rejecting persisted blueprint"),
            }
        }
        Ok(())
    }

    async fn on_evolution(&self, report: &EvolutionReport) -> Result<()> {
        if report.habitual_patterns.is_empty() {
            return Ok(());
        }
        let reply = self.llm.complete(&Self::synthesis_prompt(report)).await?;
        let Some(blueprint) = extract_typed::<ToolBlueprint>(&reply) else {
            warn!("synthesis reply was not a blueprint, skipping");
            return Ok(());
        };
        // The denylist pre-check runs before anything is persisted.
        if let Err(e) = SynthesizedTool::new(blueprint.clone()) {
            warn!(tool = %blueprint.name, error = %e, "rejected synthesized blueprint");
            return Ok(());
        }
        save_blueprint(&self.blueprint_dir, &blueprint)?;
        info!(tool = %blueprint.name, confidence = blueprint.confidence, "saved blueprint");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::state::RunStatus;
    use crate::llm::mock::ScriptedLlm;
    use crate::store::{KarmaEntry, KarmaType, Severity};

    fn report_with_habit() -> EvolutionReport {
        let mut karma = KarmaEntry::new(
            "arithmetic by hand keeps failing",
            "computing totals",
            Severity::Med,
            "loop",
            KarmaType::Unskillful,
        );
        karma.occurrences = 4;
        EvolutionReport {
            agent_id: "a".into(),
            goal: "g".into(),
            status: RunStatus::Failed,
            step_count: 10,
            new_failures: Vec::new(),
            habitual_patterns: vec![karma],
            strategies: Vec::new(),
            summary: String::new(),
        }
    }

    fn blueprint_reply() -> String {
        serde_json::json!({
            "name": "totaler",
            "description": "Add two totals",
            "parameters": {"type": "object", "properties": {"a": {}, "b": {}}},
            "implementation": "a + b",
            "confidence": 0.8,
            "reason": "recurring arithmetic failures"
        })
        .to_string()
    }

    #[tokio::test]
    async fn evolution_persists_a_valid_blueprint() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new().push_completion(blueprint_reply()));
        let plugin = ForgePlugin::new(llm, dir.path());

        plugin.on_evolution(&report_with_habit()).await.unwrap();

        let saved = load_blueprints(dir.path());
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "totaler");
    }

    #[tokio::test]
    async fn forbidden_blueprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reply = serde_json::json!({
            "name": "evil",
            "description": "d",
            "parameters": {},
            "implementation": "exec(a)",
            "confidence": 0.9,
            "reason": "r"
        })
        .to_string();
        let llm = Arc::new(ScriptedLlm::new().push_completion(reply));
        let plugin = ForgePlugin::new(llm, dir.path());

        plugin.on_evolution(&report_with_habit()).await.unwrap();
        assert!(load_blueprints(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn no_habits_means_no_model_call() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new());
        let plugin = ForgePlugin::new(Arc::clone(&llm) as Arc<dyn LlmClient>, dir.path());

        let mut report = report_with_habit();
        report.habitual_patterns.clear();
        plugin.on_evolution(&report).await.unwrap();

        assert_eq!(llm.completion_calls(), 0);
    }
}
