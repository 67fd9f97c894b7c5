//! Prajna plugin: hierarchical memory wired into the loop.
//!
//! Observations from completed actions land in the working layer; memory
//! hints relevant to the goal flow back into the observe prompt. A
//! consolidation pass runs every N steps.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::agent::state::Action;
use crate::error::Result;
use crate::store::prajna::PrajnaMemory;
use crate::tool::ToolResult;

use super::{Plugin, StepContext};

/// Hierarchical memory as a loop extension.
#[derive(Debug)]
pub struct PrajnaPlugin {
    memory: Mutex<PrajnaMemory>,
    consolidate_every: usize,
    hint_count: usize,
}

impl PrajnaPlugin {
    /// Wrap a hierarchical memory, consolidating every `consolidate_every`
    /// steps.
    #[must_use]
    pub fn new(memory: PrajnaMemory, consolidate_every: usize) -> Self {
        Self {
            memory: Mutex::new(memory),
            consolidate_every: consolidate_every.max(1),
            hint_count: 3,
        }
    }

    /// Access the wrapped memory, for tests and diagnostics.
    pub async fn with_memory<R>(&self, f: impl FnOnce(&mut PrajnaMemory) -> R) -> R {
        let mut memory = self.memory.lock().await;
        f(&mut memory)
    }
}

#[async_trait]
impl Plugin for PrajnaPlugin {
    fn name(&self) -> &str {
        "prajna"
    }

    async fn before_observe(&self, ctx: &StepContext) -> Vec<String> {
        let mut memory = self.memory.lock().await;
        match memory.recall(&ctx.goal, self.hint_count).await {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| format!("memory: {}", hit.entry.content))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "memory recall failed");
                Vec::new()
            }
        }
    }

    async fn after_action(
        &self,
        ctx: &StepContext,
        action: &Action,
        result: &ToolResult,
    ) -> Result<()> {
        let observation = format!(
            "step {}: {} -> {}",
            ctx.step,
            action.tool_name,
            result.to_observation()
        );
        let relevance = if result.success { 0.6 } else { 0.8 };
        let mut memory = self.memory.lock().await;
        memory
            .remember(
                observation,
                serde_json::json!({"tool": action.tool_name, "step": ctx.step}),
                relevance,
            )
            .await?;
        if ctx.step % self.consolidate_every == 0 {
            memory.consolidate();
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::prajna::{MemoryLayer, PrajnaConfig};

    fn ctx(step: usize) -> StepContext {
        StepContext {
            step,
            max_steps: 30,
            goal: "summarize the report".into(),
            agent_id: "a".into(),
        }
    }

    fn action() -> Action {
        Action {
            tool_name: "file_read".into(),
            parameters: serde_json::json!({"path": "report.txt"}),
            rationale: None,
        }
    }

    #[tokio::test]
    async fn actions_become_working_memories() {
        let plugin = PrajnaPlugin::new(PrajnaMemory::new(PrajnaConfig::default()), 5);
        plugin
            .after_action(&ctx(1), &action(), &ToolResult::ok(serde_json::json!("text")))
            .await
            .unwrap();
        let count = plugin.with_memory(|m| m.layer_len(MemoryLayer::Working)).await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn hints_surface_relevant_memories() {
        let mut memory = PrajnaMemory::new(PrajnaConfig::default());
        memory
            .remember(
                "summarize the report using section headers",
                serde_json::json!({}),
                0.9,
            )
            .await
            .unwrap();
        let plugin = PrajnaPlugin::new(memory, 5);

        let hints = plugin.before_observe(&ctx(2)).await;
        assert_eq!(hints.len(), 1);
        assert!(hints[0].starts_with("memory: "));
    }

    #[tokio::test]
    async fn consolidates_on_schedule() {
        let plugin = PrajnaPlugin::new(PrajnaMemory::new(PrajnaConfig::default()), 2);
        let failed = ToolResult::fail("x");
        plugin.after_action(&ctx(1), &action(), &failed).await.unwrap();
        let before = plugin
            .with_memory(|m| {
                m.layer_entries(MemoryLayer::Working)
                    .iter()
                    .map(|e| e.relevance)
                    .fold(0.0f32, f32::max)
            })
            .await;
        plugin.after_action(&ctx(2), &action(), &failed).await.unwrap();
        // The step-2 consolidation decayed the surviving working entries.
        let after = plugin
            .with_memory(|m| {
                m.layer_entries(MemoryLayer::Working)
                    .iter()
                    .map(|e| e.relevance)
                    .fold(0.0f32, f32::max)
            })
            .await;
        assert!(after < before);
    }
}
