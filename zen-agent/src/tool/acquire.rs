//! Acquired external tools behind a build-time capability registry.
//!
//! Rather than downloading packages at runtime, the set of acquirable
//! external capabilities is fixed at build time: each known package name
//! maps to a wrapper tool this crate already ships. Acquisition records a
//! manifest per tool and hands back the wrapper bounded by the external
//! execution timeout. The whole subsystem is inert unless explicitly
//! enabled in configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::store::write_json_atomic;

use super::builtins::HttpRequestTool;
use super::forge::{SynthesizedTool, ToolBlueprint};
use super::{Tool, ToolResult};

/// Default wall-clock bound for one acquired-tool execution.
pub const EXTERNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Record of an acquired external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquiredToolManifest {
    /// The external package the capability stands in for.
    pub package_name: String,
    /// Name of the wrapper tool.
    pub tool_name: String,
    /// Description of the capability.
    pub description: String,
    /// The wrapper source recorded for auditing.
    pub wrapper_code: String,
    /// When the tool was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Whether the wrapper passed validation.
    pub validated: bool,
}

/// The packages this build can stand in for.
#[must_use]
pub fn known_packages() -> Vec<&'static str> {
    vec!["mathjs", "node-fetch"]
}

/// Acquire a capability for `package_name`.
///
/// Writes `<dir>/<tool_name>.json` and returns the wrapper tool, already
/// bounded by [`EXTERNAL_TIMEOUT`].
///
/// # Errors
///
/// Returns a configuration error for unknown packages and a storage error
/// when the manifest cannot be written.
pub fn acquire(package_name: &str, dir: &Path) -> Result<(AcquiredToolManifest, Arc<dyn Tool>)> {
    let (tool, wrapper_code): (Arc<dyn Tool>, String) = match package_name {
        "mathjs" => {
            let blueprint = ToolBlueprint {
                name: "math_eval".to_owned(),
                description: "Evaluate an arithmetic expression".to_owned(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "a": {"type": "number"},
                        "b": {"type": "number"},
                        "op": {"type": "string", "enum": ["add", "sub", "mul", "div"]}
                    },
                    "required": ["a", "b", "op"]
                }),
                implementation: concat!(
                    r#"if(op == "add", a + b, "#,
                    r#"if(op == "sub", a - b, "#,
                    r#"if(op == "mul", a * b, a / b)))"#
                )
                .to_owned(),
                confidence: 1.0,
                reason: "fixed build-time capability".to_owned(),
            };
            let code = blueprint.implementation.clone();
            (Arc::new(SynthesizedTool::new(blueprint)?), code)
        }
        "node-fetch" => (
            Arc::new(HttpRequestTool::new().with_timeout(EXTERNAL_TIMEOUT)),
            "http_request(url, method, body)".to_owned(),
        ),
        other => {
            return Err(AgentError::config(format!(
                "no build-time capability for package '{other}'"
            )));
        }
    };

    let manifest = AcquiredToolManifest {
        package_name: package_name.to_owned(),
        tool_name: tool.name().to_owned(),
        description: tool.description(),
        wrapper_code,
        acquired_at: Utc::now(),
        validated: true,
    };
    let path = dir.join(format!("{}.json", manifest.tool_name));
    write_json_atomic(&path, &manifest)?;

    Ok((manifest, Arc::new(ExternalTool { inner: tool, timeout: EXTERNAL_TIMEOUT })))
}

/// Wrapper enforcing the external execution timeout.
#[derive(Debug)]
struct ExternalTool {
    inner: Arc<dyn Tool>,
    timeout: Duration,
}

#[async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, params: Value) -> ToolResult {
        match tokio::time::timeout(self.timeout, self.inner.execute(params)).await {
            Ok(result) => result,
            Err(_) => ToolResult::fail(format!(
                "external tool timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_math_capability_and_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, tool) = acquire("mathjs", dir.path()).unwrap();

        assert_eq!(manifest.package_name, "mathjs");
        assert!(manifest.validated);
        assert!(dir.path().join("math_eval.json").exists());

        let result = tool
            .execute(serde_json::json!({"a": 6, "b": 7, "op": "mul"}))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, serde_json::json!(42));
    }

    #[test]
    fn unknown_package_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = acquire("left-pad", dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[test]
    fn known_packages_is_stable() {
        assert!(known_packages().contains(&"mathjs"));
    }
}
