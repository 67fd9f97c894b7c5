//! Resilience plugin: per-tool circuit breakers.
//!
//! `before_action` consults the tool's breaker and rejects the action while
//! it is open; `after_action` records the outcome. The breaker map is
//! shareable so an ethics plugin can trip breakers on tanha-loop events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::state::Action;
use crate::error::{AgentError, Result};
use crate::resilience::CircuitBreaker;
use crate::tool::ToolResult;

use super::{Plugin, StepContext};

/// Breaker map shared between plugins.
pub type SharedBreakers = Arc<Mutex<HashMap<String, CircuitBreaker>>>;

/// Per-tool circuit breaking for the agent loop.
#[derive(Debug)]
pub struct ResiliencePlugin {
    breakers: SharedBreakers,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl ResiliencePlugin {
    /// Create the plugin with the given breaker parameters.
    #[must_use]
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            breakers: Arc::new(Mutex::new(HashMap::new())),
            failure_threshold,
            reset_timeout,
        }
    }

    /// The shared breaker map, for wiring into other plugins.
    #[must_use]
    pub fn breakers(&self) -> SharedBreakers {
        Arc::clone(&self.breakers)
    }

    /// Force-open the breaker for a tool.
    pub fn trip(breakers: &SharedBreakers, tool_name: &str, threshold: u32, timeout: Duration) {
        let mut map = breakers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.entry(tool_name.to_owned())
            .or_insert_with(|| CircuitBreaker::new(tool_name, threshold, timeout))
            .force_open();
    }

    fn with_breaker<R>(&self, tool_name: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut map = self.breakers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let breaker = map.entry(tool_name.to_owned()).or_insert_with(|| {
            CircuitBreaker::new(tool_name, self.failure_threshold, self.reset_timeout)
        });
        f(breaker)
    }
}

impl Default for ResiliencePlugin {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

#[async_trait]
impl Plugin for ResiliencePlugin {
    fn name(&self) -> &str {
        "resilience"
    }

    async fn before_action(&self, _ctx: &StepContext, action: &Action) -> Result<()> {
        self.with_breaker(&action.tool_name, CircuitBreaker::check)
    }

    async fn after_action(
        &self,
        _ctx: &StepContext,
        action: &Action,
        result: &ToolResult,
    ) -> Result<()> {
        self.with_breaker(&action.tool_name, |breaker| {
            if result.success {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        });
        Ok(())
    }

    async fn on_error(&self, _ctx: &StepContext, error: &AgentError) {
        if let AgentError::Tool { tool_name, .. } = error {
            self.with_breaker(tool_name, CircuitBreaker::record_failure);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn action(tool: &str) -> Action {
        Action { tool_name: tool.into(), parameters: serde_json::json!({}), rationale: None }
    }

    fn ctx() -> StepContext {
        StepContext { step: 1, max_steps: 30, goal: "g".into(), agent_id: "a".into() }
    }

    #[tokio::test]
    async fn opens_after_repeated_failures() {
        let plugin = ResiliencePlugin::new(2, Duration::from_secs(60));
        let failed = ToolResult::fail("boom");

        plugin.after_action(&ctx(), &action("flaky"), &failed).await.unwrap();
        assert!(plugin.before_action(&ctx(), &action("flaky")).await.is_ok());

        plugin.after_action(&ctx(), &action("flaky"), &failed).await.unwrap();
        let err = plugin.before_action(&ctx(), &action("flaky")).await.unwrap_err();
        assert!(matches!(err, AgentError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn breakers_are_per_tool() {
        let plugin = ResiliencePlugin::new(1, Duration::from_secs(60));
        plugin
            .after_action(&ctx(), &action("flaky"), &ToolResult::fail("x"))
            .await
            .unwrap();

        assert!(plugin.before_action(&ctx(), &action("flaky")).await.is_err());
        assert!(plugin.before_action(&ctx(), &action("steady")).await.is_ok());
    }

    #[tokio::test]
    async fn success_resets_the_count() {
        let plugin = ResiliencePlugin::new(2, Duration::from_secs(60));
        let act = action("tool");

        plugin.after_action(&ctx(), &act, &ToolResult::fail("x")).await.unwrap();
        plugin
            .after_action(&ctx(), &act, &ToolResult::ok(serde_json::json!(null)))
            .await
            .unwrap();
        plugin.after_action(&ctx(), &act, &ToolResult::fail("x")).await.unwrap();
        assert!(plugin.before_action(&ctx(), &act).await.is_ok());
    }

    #[tokio::test]
    async fn trip_forces_open() {
        let plugin = ResiliencePlugin::default();
        ResiliencePlugin::trip(&plugin.breakers(), "bad", 3, Duration::from_secs(60));
        assert!(plugin.before_action(&ctx(), &action("bad")).await.is_err());
    }
}
