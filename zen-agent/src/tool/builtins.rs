//! Built-in file and HTTP tools.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolResult};

/// Resolve `path` under an optional root, rejecting escapes.
fn resolve(root: Option<&Path>, path: &str) -> Result<PathBuf, String> {
    let candidate = PathBuf::from(path);
    let Some(root) = root else {
        return Ok(candidate);
    };
    let joined = if candidate.is_absolute() { candidate } else { root.join(path) };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            std::path::Component::ParentDir => {
                if !normalized.pop() {
                    return Err(format!("path '{path}' escapes the workspace root"));
                }
            }
            std::path::Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    if !normalized.starts_with(root) {
        return Err(format!("path '{path}' escapes the workspace root"));
    }
    Ok(normalized)
}

/// Read a UTF-8 file from disk.
#[derive(Debug, Clone, Default)]
pub struct FileReadTool {
    /// Optional root every path is resolved under.
    pub root: Option<PathBuf>,
    /// Maximum bytes returned (0 = unlimited).
    pub max_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct FileReadArgs {
    path: String,
}

impl FileReadTool {
    /// Create a file reader rooted at `root`.
    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()), max_bytes: 256 * 1024 }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> String {
        "Read a UTF-8 text file and return its contents".to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let args: FileReadArgs = match serde_json::from_value(params) {
            Ok(args) => args,
            Err(e) => return ToolResult::fail_permanent(format!("invalid arguments: {e}")),
        };
        let path = match resolve(self.root.as_deref(), &args.path) {
            Ok(path) => path,
            Err(e) => return ToolResult::fail_permanent(e),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(mut contents) => {
                if self.max_bytes > 0 && contents.len() > self.max_bytes {
                    contents.truncate(self.max_bytes);
                }
                ToolResult::ok(serde_json::json!({
                    "path": path.display().to_string(),
                    "contents": contents,
                }))
            }
            Err(e) => ToolResult::fail(format!("reading {}: {e}", path.display())),
        }
    }
}

/// Write a UTF-8 file to disk, creating parent directories.
#[derive(Debug, Clone, Default)]
pub struct FileWriteTool {
    /// Optional root every path is resolved under.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct FileWriteArgs {
    path: String,
    contents: String,
}

impl FileWriteTool {
    /// Create a file writer rooted at `root`.
    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> String {
        "Write text contents to a file, creating parent directories".to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to write"},
                "contents": {"type": "string", "description": "Text contents to write"}
            },
            "required": ["path", "contents"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let args: FileWriteArgs = match serde_json::from_value(params) {
            Ok(args) => args,
            Err(e) => return ToolResult::fail_permanent(format!("invalid arguments: {e}")),
        };
        let path = match resolve(self.root.as_deref(), &args.path) {
            Ok(path) => path,
            Err(e) => return ToolResult::fail_permanent(e),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::fail(format!("creating {}: {e}", parent.display()));
        }
        match tokio::fs::write(&path, args.contents.as_bytes()).await {
            Ok(()) => ToolResult::ok(serde_json::json!({
                "artifact": true,
                "path": path.display().to_string(),
                "bytesWritten": args.contents.len(),
            })),
            Err(e) => ToolResult::fail(format!("writing {}: {e}", path.display())),
        }
    }
}

/// Perform an HTTP GET or POST request.
#[derive(Debug, Clone)]
pub struct HttpRequestTool {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct HttpRequestArgs {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
}

impl HttpRequestTool {
    /// Create the tool with the default 10 s timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
            max_bytes: 512 * 1024,
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> String {
        "Perform an HTTP GET or POST request and return the response body".to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to request"},
                "method": {"type": "string", "enum": ["GET", "POST"], "description": "HTTP method, default GET"},
                "body": {"description": "JSON body for POST requests"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let args: HttpRequestArgs = match serde_json::from_value(params) {
            Ok(args) => args,
            Err(e) => return ToolResult::fail_permanent(format!("invalid arguments: {e}")),
        };
        let method = args.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let request = match method.as_str() {
            "GET" => self.client.get(&args.url),
            "POST" => {
                let builder = self.client.post(&args.url);
                match args.body {
                    Some(body) => builder.json(&body),
                    None => builder,
                }
            }
            other => {
                return ToolResult::fail_permanent(format!("unsupported method '{other}'"));
            }
        };
        match request.timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(mut body) => {
                        if body.len() > self.max_bytes {
                            body.truncate(self.max_bytes);
                        }
                        ToolResult::ok(serde_json::json!({
                            "status": status,
                            "body": body,
                        }))
                    }
                    Err(e) => ToolResult::fail(format!("reading response body: {e}")),
                }
            }
            Err(e) if e.is_timeout() => {
                ToolResult::fail(format!("request timed out after {:?}", self.timeout))
            }
            Err(e) => ToolResult::fail(format!("request failed: {e}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_and_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let write = FileWriteTool::rooted(dir.path());
        let read = FileReadTool::rooted(dir.path());

        let result = write
            .execute(serde_json::json!({"path": "notes/summary.txt", "contents": "hello"}))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.output["path"].as_str().unwrap().ends_with("summary.txt"));

        let result = read.execute(serde_json::json!({"path": "notes/summary.txt"})).await;
        assert!(result.success);
        assert_eq!(result.output["contents"], "hello");
    }

    #[tokio::test]
    async fn read_missing_file_fails_transiently() {
        let dir = tempfile::tempdir().unwrap();
        let read = FileReadTool::rooted(dir.path());
        let result = read.execute(serde_json::json!({"path": "absent.txt"})).await;
        assert!(!result.success);
        assert!(!result.is_permanent_failure());
    }

    #[tokio::test]
    async fn escaping_the_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let read = FileReadTool::rooted(dir.path());
        let result = read.execute(serde_json::json!({"path": "../../etc/passwd"})).await;
        assert!(!result.success);
        assert!(result.is_permanent_failure());
    }

    #[tokio::test]
    async fn invalid_arguments_are_permanent() {
        let write = FileWriteTool::default();
        let result = write.execute(serde_json::json!({"path": "x"})).await;
        assert!(result.is_permanent_failure());
    }

    #[test]
    fn resolve_allows_nested_relative_paths() {
        let root = Path::new("/workspace");
        let resolved = resolve(Some(root), "a/b/../c.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/workspace/a/c.txt"));
    }
}
