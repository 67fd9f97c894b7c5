//! Sila plugin: rule-based ethics vetoes.
//!
//! Each rule is a pattern matched (case-insensitively) against the delta's
//! description and gaps; a hit vetoes the step. When wired to the
//! resilience plugin's breaker map, the plugin also listens for tanha-loop
//! events and trips the circuit breaker of the looping tool.

use std::time::Duration;

use async_trait::async_trait;

use crate::agent::ZenAgent;
use crate::agent::state::Delta;
use crate::error::Result;
use crate::event::AgentEvent;

use super::resilience::{ResiliencePlugin, SharedBreakers};
use super::{Plugin, StepContext, Veto};

/// One ethics rule.
#[derive(Debug, Clone)]
pub struct SilaRule {
    /// Pattern matched against the delta text, case-insensitive.
    pub pattern: String,
    /// Reason reported when the rule vetoes.
    pub reason: String,
}

impl SilaRule {
    /// Create a rule.
    #[must_use]
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { pattern: pattern.into().to_lowercase(), reason: reason.into() }
    }
}

/// Rule-based ethics vetoes over computed deltas.
#[derive(Debug, Default)]
pub struct SilaPlugin {
    rules: Vec<SilaRule>,
    breakers: Option<SharedBreakers>,
}

impl SilaPlugin {
    /// Create the plugin with a rule list.
    #[must_use]
    pub fn new(rules: Vec<SilaRule>) -> Self {
        Self { rules, breakers: None }
    }

    /// Wire the resilience plugin's breaker map so tanha loops trip the
    /// offending tool's breaker.
    #[must_use]
    pub fn with_breakers(mut self, breakers: SharedBreakers) -> Self {
        self.breakers = Some(breakers);
        self
    }

    fn matching_rule(&self, delta: &Delta) -> Option<&SilaRule> {
        let mut haystack = delta.description.to_lowercase();
        for gap in &delta.gaps {
            haystack.push('\n');
            haystack.push_str(&gap.to_lowercase());
        }
        self.rules.iter().find(|rule| haystack.contains(&rule.pattern))
    }
}

#[async_trait]
impl Plugin for SilaPlugin {
    fn name(&self) -> &str {
        "sila"
    }

    async fn install(&self, agent: &mut ZenAgent) -> Result<()> {
        if let Some(breakers) = self.breakers.clone() {
            agent.events().on(move |event| {
                if let AgentEvent::TanhaLoopDetected { pattern, .. } = event {
                    let tool = pattern.split(':').next().unwrap_or(pattern);
                    ResiliencePlugin::trip(&breakers, tool, 3, Duration::from_secs(30));
                    tracing::warn!(tool, "tanha loop tripped circuit breaker");
                }
            });
        }
        Ok(())
    }

    async fn after_delta(&self, ctx: &StepContext, delta: &Delta) -> Option<Veto> {
        let rule = self.matching_rule(delta)?;
        tracing::warn!(step = ctx.step, pattern = %rule.pattern, "sila veto");
        Some(Veto::new(rule.reason.clone()))
    }
}

/// Convenience constructor used by embedders: veto destructive operations.
#[must_use]
pub fn default_rules() -> Vec<SilaRule> {
    vec![
        SilaRule::new("delete production", "refusing to touch production data"),
        SilaRule::new("drop database", "refusing to drop databases"),
        SilaRule::new("rm -rf /", "refusing recursive filesystem deletion"),
    ]
}
