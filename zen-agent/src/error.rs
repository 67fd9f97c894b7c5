//! Error types for the zen-agent runtime.
//!
//! [`AgentError`] covers the whole taxonomy: fatal configuration errors,
//! model and protocol failures, tool failures (transient and permanent),
//! ethics vetoes, and storage problems. Each variant is a distinct failure
//! mode so callers can pattern-match on specific cases.

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// The main error type for agent operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentError {
    /// Invalid configuration. Fatal; surfaced at startup.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration issue.
        message: String,
    },

    /// Error from the language model adapter.
    #[error("Model error: {message}")]
    Llm {
        /// The underlying error message.
        message: String,
    },

    /// The model produced invalid output where structure was required
    /// (e.g. malformed delta JSON after the repair attempt).
    #[error("Protocol error: {message}. Output: {output}")]
    Protocol {
        /// The output that failed to parse.
        output: String,
        /// The parsing error message.
        message: String,
    },

    /// Error during tool execution.
    #[error("Tool '{tool_name}' failed: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// The circuit breaker for a tool is open.
    #[error("Circuit open for tool '{tool_name}'")]
    CircuitOpen {
        /// Name of the isolated tool.
        tool_name: String,
    },

    /// A tool execution exceeded its wall-clock bound.
    #[error("Tool '{tool_name}' timed out after {seconds}s")]
    ToolTimeout {
        /// Name of the tool.
        tool_name: String,
        /// The configured bound in seconds.
        seconds: u64,
    },

    /// A plugin vetoed the step.
    #[error("Vetoed: {reason}")]
    Vetoed {
        /// The veto reason reported by the plugin.
        reason: String,
    },

    /// The run was stopped via its stop handle.
    #[error("Agent run was stopped")]
    Stopped,

    /// Persistent storage failure.
    #[error("Storage error at {path}: {message}")]
    Storage {
        /// Path of the store involved.
        path: String,
        /// The underlying error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new model error.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a new protocol error.
    #[must_use]
    pub fn protocol(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            output: output.into(),
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new storage error.
    #[must_use]
    pub fn storage(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = AgentError::tool("file_read", "no such file");
        assert!(err.to_string().contains("file_read"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn json_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("not json");
        let err: AgentError = parse.unwrap_err().into();
        assert!(matches!(err, AgentError::Json(_)));
    }
}
