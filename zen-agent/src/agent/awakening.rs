//! The awakening pipeline: a staged DECIDE used when a karma store is
//! configured.
//!
//! Three `complete` calls precede the tool-selection chat:
//!
//! 1. **Investigation** — retrieved karma wisdom seeds candidate
//!    strategies;
//! 2. **Mindfulness** — ego-driven candidates (craving/aversion) are
//!    filtered out;
//! 3. **Equanimity** — the normal chat runs, restricted to the filtered
//!    strategies.
//!
//! Every stage emits `awakening:stage`. A stage that fails JSON parsing
//! drops the whole pipeline back to a single direct chat and emits the
//! `fallback` stage.

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::event::AgentEvent;
use crate::llm::ChatResponse;

use super::json_util::extract_typed;
use super::state::Delta;
use super::{ZenAgent, prompts};

#[derive(Debug, Deserialize)]
struct Investigation {
    #[serde(default)]
    hypotheses: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Mindfulness {
    filtered: Vec<String>,
    removed: Vec<String>,
    reasoning: String,
}

impl ZenAgent {
    /// The staged decision pipeline. Falls back to a plain chat when any
    /// stage fails to produce valid JSON.
    pub(crate) async fn awakened_decide(
        &mut self,
        delta: &Delta,
        fragments: &[String],
    ) -> Result<ChatResponse> {
        // Investigation
        let query = format!("{} {}", self.goal.description, delta.gaps.join(" "));
        let wisdom: Vec<String> = match self.karma_store.as_ref() {
            Some(karma) => karma
                .retrieve(&query, 5)
                .await?
                .into_iter()
                .map(|hit| format!("{} (when: {})", hit.item.proverb, hit.item.condition))
                .collect(),
            None => Vec::new(),
        };
        let raw = self
            .llm
            .complete(&prompts::investigation(&self.state, delta, &wisdom))
            .await?;
        let Some(investigation) = extract_typed::<Investigation>(&raw) else {
            return self.fallback_decide(delta, fragments).await;
        };
        self.events.emit(&AgentEvent::AwakeningStage {
            stage: "investigation".to_owned(),
            confidence: None,
        });

        // Mindfulness
        let raw = self
            .llm
            .complete(&prompts::mindfulness(&investigation.hypotheses))
            .await?;
        let Some(mindfulness) = extract_typed::<Mindfulness>(&raw) else {
            return self.fallback_decide(delta, fragments).await;
        };
        debug!(
            removed = mindfulness.removed.len(),
            reasoning = %mindfulness.reasoning,
            "mindfulness filtered hypotheses"
        );
        self.events.emit(&AgentEvent::AwakeningStage {
            stage: "mindfulness".to_owned(),
            confidence: None,
        });

        // Equanimity: decide among what survived the filter.
        let proposed = investigation.hypotheses.len();
        let confidence = if proposed == 0 {
            1.0
        } else {
            mindfulness.filtered.len() as f32 / proposed as f32
        };
        self.events.emit(&AgentEvent::AwakeningStage {
            stage: "equanimity".to_owned(),
            confidence: Some(confidence),
        });
        self.chat_decide(delta, fragments, Some(&mindfulness.filtered)).await
    }

    async fn fallback_decide(
        &mut self,
        delta: &Delta,
        fragments: &[String],
    ) -> Result<ChatResponse> {
        self.events.emit(&AgentEvent::AwakeningStage {
            stage: "fallback".to_owned(),
            confidence: None,
        });
        self.chat_decide(delta, fragments, None).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::state::RunStatus;
    use crate::agent::{Goal, ZenAgentConfig};
    use crate::event::EventLog;
    use crate::llm::mock::ScriptedLlm;
    use crate::store::KarmaStore;

    fn delta_json(progress: f32, complete: bool) -> serde_json::Value {
        serde_json::json!({
            "description": "assessed",
            "progress": progress,
            "gaps": ["missing piece"],
            "isComplete": complete,
        })
    }

    #[tokio::test]
    async fn staged_decide_emits_all_three_stages() {
        let llm = Arc::new(
            ScriptedLlm::new()
                // step 1: delta, investigation, mindfulness, then chat
                .push_completion_json(&delta_json(0.4, false))
                .push_completion_json(&serde_json::json!({
                    "hypotheses": ["read the file", "guess the contents"]
                }))
                .push_completion_json(&serde_json::json!({
                    "filtered": ["read the file"],
                    "removed": ["guess the contents"],
                    "reasoning": "guessing is craving certainty"
                }))
                .push_chat_text("done"),
        );
        let config = ZenAgentConfig::new(Goal::new("understand the file"), Arc::clone(&llm) as _)
            .with_karma_store(KarmaStore::new(None, None));
        let mut agent = ZenAgent::new(config).unwrap();
        let log = EventLog::new();
        log.attach(agent.events());

        let report = agent.run().await.unwrap();
        assert_eq!(report.status, RunStatus::Done);

        let stages: Vec<String> = log
            .events()
            .iter()
            .filter_map(|event| match event {
                AgentEvent::AwakeningStage { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(stages, vec!["investigation", "mindfulness", "equanimity"]);

        // The equanimity chat saw only the filtered strategy.
        let prompt = llm.chat_prompts().into_iter().next().unwrap();
        assert!(prompt.contains("read the file"));
        assert!(!prompt.contains("guess the contents"));
    }

    #[tokio::test]
    async fn equanimity_confidence_is_filter_ratio() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .push_completion_json(&delta_json(0.4, false))
                .push_completion_json(&serde_json::json!({"hypotheses": ["a", "b", "c", "d"]}))
                .push_completion_json(&serde_json::json!({"filtered": ["a"], "removed": ["b", "c", "d"]}))
                .push_chat_text("done"),
        );
        let config = ZenAgentConfig::new(Goal::new("g"), llm)
            .with_karma_store(KarmaStore::new(None, None));
        let mut agent = ZenAgent::new(config).unwrap();
        let log = EventLog::new();
        log.attach(agent.events());

        agent.run().await.unwrap();

        let confidence = log
            .events()
            .iter()
            .find_map(|event| match event {
                AgentEvent::AwakeningStage { stage, confidence } if stage == "equanimity" => {
                    *confidence
                }
                _ => None,
            })
            .unwrap();
        assert!((confidence - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn broken_stage_falls_back_to_direct_chat() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .push_completion_json(&delta_json(0.4, false))
                .push_completion("the investigation refuses to be json")
                .push_chat_text("done"),
        );
        let config = ZenAgentConfig::new(Goal::new("g"), Arc::clone(&llm) as _)
            .with_karma_store(KarmaStore::new(None, None));
        let mut agent = ZenAgent::new(config).unwrap();
        let log = EventLog::new();
        log.attach(agent.events());

        let report = agent.run().await.unwrap();
        assert_eq!(report.status, RunStatus::Done);
        assert_eq!(log.count("awakening:stage"), 1);
        let fallback = log.events().iter().any(|event| {
            matches!(event, AgentEvent::AwakeningStage { stage, .. } if stage == "fallback")
        });
        assert!(fallback);
        // One chat happened despite the broken pipeline.
        assert_eq!(llm.chat_calls(), 1);
    }
}
