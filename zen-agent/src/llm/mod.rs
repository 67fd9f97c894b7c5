//! The uniform language-model adapter contract.
//!
//! The agent loop talks to every model through [`LlmClient`]: plain
//! completion, embedding, and tool-aware chat. Vendor HTTP serialization
//! lives outside this crate; adapters only need to satisfy this trait.
//!
//! Adapters without native embeddings may expose the deterministic
//! [`hash_embedding`](crate::vector::hash_embedding) pseudo-embedding; they
//! must declare its dimension through [`LlmClient::embedding_dim`]. Mixed
//! embedding dimensions in one store are forbidden and rejected by the
//! stores themselves.

pub mod mock;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::message::{ChatMessage, ToolCall};
use crate::usage::TokenUsage;

/// A tool advertised to the model for function calling.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Name of the tool.
    pub name: String,
    /// Description that helps the model decide when to use the tool.
    pub description: String,
    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

/// Options for a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Tools available for function calling.
    pub tools: Vec<ToolSpec>,
    /// Maximum tokens to generate. Adapters send this only when set.
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    /// Create empty chat options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the available tools.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the max token budget.
    #[must_use]
    pub const fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Response from a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Text content of the reply, if any.
    pub content: Option<String>,
    /// Tool calls requested by the model. Empty means the model is done.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this call, when the adapter reports it.
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    /// Create a text-only response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    /// Attach usage to the response.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// The adapter contract every language model backend implements.
///
/// Implementations must forward conversations in insertion order — tool
/// result messages included — so the model sees actions and observations in
/// the order they happened.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// The model identifier (e.g. `"gpt-4o"`), used for cost lookup.
    fn model_id(&self) -> &str;

    /// Dimension of the vectors returned by [`embed`](Self::embed).
    fn embedding_dim(&self) -> usize;

    /// Complete a bare prompt into text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Embed a text into a vector of [`embedding_dim`](Self::embedding_dim) length.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Run a tool-aware chat over the conversation.
    async fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatResponse>;
}
