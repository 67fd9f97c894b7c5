//! Tool contract and registry.
//!
//! Tools are the agent's hands: each one advertises a name, a description,
//! and a JSON schema for its parameters, and executes against a JSON
//! arguments object. Execution never fails at the type level — failures are
//! carried in [`ToolResult`] so the loop can record and learn from them.

pub mod acquire;
pub mod builtins;
pub mod forge;

pub use builtins::{FileReadTool, FileWriteTool, HttpRequestTool};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::ToolSpec;

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the execution succeeded.
    pub success: bool,
    /// The tool's output value.
    pub output: Value,
    /// Error description when the execution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    #[must_use]
    pub fn ok(output: Value) -> Self {
        Self { success: true, output, error: None }
    }

    /// Create a failed result.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, output: Value::Null, error: Some(error.into()) }
    }

    /// Create a failed result the loop must not retry.
    #[must_use]
    pub fn fail_permanent(error: impl Into<String>) -> Self {
        Self::fail(format!("permanent: {}", error.into()))
    }

    /// Whether the failure is explicitly non-retryable.
    #[must_use]
    pub fn is_permanent_failure(&self) -> bool {
        self.error.as_deref().is_some_and(|e| e.starts_with("permanent:"))
    }

    /// Render the result as an observation string for the model.
    #[must_use]
    pub fn to_observation(&self) -> String {
        match &self.error {
            Some(error) => format!("Error: {error}"),
            None => serde_json::to_string(&self.output).unwrap_or_else(|_| self.output.to_string()),
        }
    }
}

/// The core trait every tool implements.
///
/// The trait is object-safe; agents hold tools as `Arc<dyn Tool>`.
/// Implementations must be re-entrant — the daemon may run concurrent tasks
/// against the same tool instance.
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    /// Name of the tool. Must be unique within an agent.
    fn name(&self) -> &str;

    /// Description that helps the model decide when to use the tool.
    fn description(&self) -> String;

    /// JSON schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool against a JSON arguments object.
    async fn execute(&self, params: Value) -> ToolResult;

    /// The spec advertised to the model.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_owned(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

/// A collection of tools keyed by name, insertion-ordered.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a tool with the same name is
    /// already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_owned();
        if self.index.contains_key(&name) {
            return Err(AgentError::config(format!("duplicate tool name '{name}'")));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&position| &self.tools[position])
    }

    /// Whether a tool with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Specs of all tools, in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec()).collect()
    }

    /// Names of all tools, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// An unknown name is a permanent failure — retrying cannot make the
    /// tool appear.
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(params).await,
            None => ToolResult::fail_permanent(format!("unknown tool '{name}'")),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> String {
            "Echo the arguments back".to_owned()
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, params: Value) -> ToolResult {
            ToolResult::ok(serde_json::json!({"received": params}))
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { name: "echo" })).unwrap();
        let err = registry.register(Arc::new(EchoTool { name: "echo" })).unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[test]
    fn specs_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { name: "alpha" })).unwrap();
        registry.register(Arc::new(EchoTool { name: "beta" })).unwrap();
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn execute_routes_to_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { name: "echo" })).unwrap();
        let result = registry.execute("echo", serde_json::json!({"x": 1})).await;
        assert!(result.success);
        assert_eq!(result.output["received"]["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_permanent_failure() {
        let registry = ToolRegistry::new();
        let result = registry.execute("missing", Value::Null).await;
        assert!(!result.success);
        assert!(result.is_permanent_failure());
    }

    #[test]
    fn observation_renders_error_or_output() {
        let ok = ToolResult::ok(serde_json::json!({"n": 42}));
        assert!(ok.to_observation().contains("42"));
        let fail = ToolResult::fail("boom");
        assert!(fail.to_observation().contains("boom"));
    }
}
