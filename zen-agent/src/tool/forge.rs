//! Synthesized tools: LLM-designed blueprints run in a restricted
//! expression sandbox.
//!
//! A blueprint's `implementation` is a single `evalexpr` expression whose
//! variables are the call's parameters. Before a blueprint is accepted it
//! passes a static denylist pre-check (no process spawning, filesystem or
//! network escapes), and every evaluation is bounded by a wall-clock
//! timeout. Accepted blueprints are persisted one file per tool.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use evalexpr::ContextWithMutableVariables;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{AgentError, Result};
use crate::store::write_json_atomic;

use super::{Tool, ToolResult};

/// Default wall-clock bound for one synthesized-tool evaluation.
pub const SYNTHESIZED_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifiers a blueprint implementation must not contain.
const DENYLIST: &[&str] = &[
    "process", "spawn", "exec", "system", "shell", "command", "fork",
    "fs", "file", "unlink", "remove", "rmdir", "chmod",
    "net", "socket", "connect", "fetch", "http", "require", "import", "eval",
];

/// A synthesized tool blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBlueprint {
    /// Name of the tool.
    pub name: String,
    /// Description for the model.
    pub description: String,
    /// JSON schema for the parameters.
    pub parameters: Value,
    /// The expression evaluated against the parameters.
    pub implementation: String,
    /// The designer's confidence in the blueprint, in `[0, 1]`.
    pub confidence: f64,
    /// Why the tool was synthesized.
    pub reason: String,
}

/// Statically validate a blueprint against the denylist.
///
/// # Errors
///
/// Returns a configuration error naming the forbidden identifier.
pub fn validate_blueprint(blueprint: &ToolBlueprint) -> Result<()> {
    let lowered = blueprint.implementation.to_lowercase();
    for forbidden in DENYLIST {
        if contains_identifier(&lowered, forbidden) {
            return Err(AgentError::config(format!(
                "blueprint '{}' uses forbidden identifier '{forbidden}'",
                blueprint.name
            )));
        }
    }
    Ok(())
}

/// True when `text` contains `word` as a standalone identifier.
fn contains_identifier(text: &str, word: &str) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find(word) {
        let begin = start + offset;
        let end = begin + word.len();
        let before_ok = begin == 0 || !is_ident_byte(bytes[begin - 1]);
        let after_ok = end == bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

const fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Persist a blueprint to `<dir>/<name>.json`.
///
/// # Errors
///
/// Returns a storage error when the file cannot be written.
pub fn save_blueprint(dir: &Path, blueprint: &ToolBlueprint) -> Result<()> {
    let path = dir.join(format!("{}.json", blueprint.name));
    write_json_atomic(&path, blueprint)
}

/// Load all blueprints from a directory. Unreadable files are skipped with
/// a warning; a missing directory yields an empty list.
#[must_use]
pub fn load_blueprints(dir: &Path) -> Vec<ToolBlueprint> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut blueprints = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str(&data).map_err(|e| e.to_string()))
        {
            Ok(blueprint) => blueprints.push(blueprint),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable blueprint"),
        }
    }
    blueprints.sort_by(|a: &ToolBlueprint, b: &ToolBlueprint| a.name.cmp(&b.name));
    blueprints
}

/// A tool whose body is a sandboxed expression from a [`ToolBlueprint`].
#[derive(Debug, Clone)]
pub struct SynthesizedTool {
    blueprint: ToolBlueprint,
    timeout: Duration,
}

impl SynthesizedTool {
    /// Wrap a validated blueprint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the blueprint fails the denylist
    /// pre-check.
    pub fn new(blueprint: ToolBlueprint) -> Result<Self> {
        validate_blueprint(&blueprint)?;
        Ok(Self { blueprint, timeout: SYNTHESIZED_TIMEOUT })
    }

    /// Override the evaluation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The wrapped blueprint.
    #[must_use]
    pub const fn blueprint(&self) -> &ToolBlueprint {
        &self.blueprint
    }
}

#[async_trait]
impl Tool for SynthesizedTool {
    fn name(&self) -> &str {
        &self.blueprint.name
    }

    fn description(&self) -> String {
        self.blueprint.description.clone()
    }

    fn parameters(&self) -> Value {
        self.blueprint.parameters.clone()
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let expression = self.blueprint.implementation.clone();
        let evaluation = tokio::task::spawn_blocking(move || {
            let mut context = evalexpr::HashMapContext::new();
            if let Value::Object(map) = &params {
                for (key, value) in map {
                    if let Err(e) = context.set_value(key.clone(), to_eval_value(value)) {
                        return Err(format!("binding parameter '{key}': {e}"));
                    }
                }
            }
            evalexpr::eval_with_context(&expression, &context)
                .map(|value| from_eval_value(&value))
                .map_err(|e| e.to_string())
        });

        match tokio::time::timeout(self.timeout, evaluation).await {
            Ok(Ok(Ok(output))) => ToolResult::ok(output),
            Ok(Ok(Err(e))) => ToolResult::fail_permanent(format!("evaluation failed: {e}")),
            Ok(Err(join)) => ToolResult::fail(format!("evaluation task failed: {join}")),
            Err(_) => ToolResult::fail(format!(
                "evaluation timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

fn to_eval_value(value: &Value) -> evalexpr::Value {
    match value {
        Value::Bool(b) => evalexpr::Value::Boolean(*b),
        Value::Number(n) => n.as_i64().map_or_else(
            || evalexpr::Value::Float(n.as_f64().unwrap_or(0.0)),
            evalexpr::Value::Int,
        ),
        Value::String(s) => evalexpr::Value::String(s.clone()),
        Value::Null => evalexpr::Value::Empty,
        other => evalexpr::Value::String(other.to_string()),
    }
}

fn from_eval_value(value: &evalexpr::Value) -> Value {
    match value {
        evalexpr::Value::Boolean(b) => Value::Bool(*b),
        evalexpr::Value::Int(i) => Value::from(*i),
        evalexpr::Value::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
        }
        evalexpr::Value::String(s) => Value::String(s.clone()),
        evalexpr::Value::Tuple(items) => Value::Array(items.iter().map(from_eval_value).collect()),
        evalexpr::Value::Empty => Value::Null,
    }
}
