//! Scripted model implementation for testing.
//!
//! [`ScriptedLlm`] returns predefined replies in sequence — completions and
//! chat turns are scripted separately because the loop interleaves them.
//! Embeddings are the deterministic hash pseudo-embedding, so stores behave
//! identically across test runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::message::{ChatMessage, ToolCall};
use crate::usage::TokenUsage;
use crate::vector::hash_embedding;

use super::{ChatOptions, ChatResponse, LlmClient};

/// One scripted chat turn.
#[derive(Debug, Clone)]
pub enum ChatReply {
    /// A plain text reply (no tool calls — the model declares itself done).
    Text(String),
    /// A single tool call.
    Call {
        /// Tool to invoke.
        name: String,
        /// Arguments for the call.
        arguments: Value,
    },
}

/// A scripted model for tests.
///
/// `complete` pops from the completion script; `chat` pops from the chat
/// script. Exhausted scripts fall back to benign defaults: `"{}"` for
/// completions (an empty delta) and a text reply for chats (the model
/// declares itself done), so a test never hangs on a missing line.
#[derive(Debug)]
pub struct ScriptedLlm {
    model_id: String,
    completions: Mutex<VecDeque<String>>,
    chats: Mutex<VecDeque<ChatReply>>,
    usage_per_call: TokenUsage,
    embedding_dim: usize,
    completion_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    seen_completion_prompts: Mutex<Vec<String>>,
    seen_chat_prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    /// Create an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_id: "scripted-model".to_string(),
            completions: Mutex::new(VecDeque::new()),
            chats: Mutex::new(VecDeque::new()),
            usage_per_call: TokenUsage::new(10, 5),
            embedding_dim: 32,
            completion_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            seen_completion_prompts: Mutex::new(Vec::new()),
            seen_chat_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Set a custom model id.
    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set the usage reported by every chat call.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage_per_call = usage;
        self
    }

    /// Queue a raw completion reply.
    #[must_use]
    pub fn push_completion(self, text: impl Into<String>) -> Self {
        self.completions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(text.into());
        self
    }

    /// Queue a completion reply serialized from a JSON value.
    #[must_use]
    pub fn push_completion_json(self, value: &Value) -> Self {
        let text = value.to_string();
        self.push_completion(text)
    }

    /// Queue a plain-text chat reply.
    #[must_use]
    pub fn push_chat_text(self, text: impl Into<String>) -> Self {
        self.chats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(ChatReply::Text(text.into()));
        self
    }

    /// Queue a tool-call chat reply.
    #[must_use]
    pub fn push_tool_call(self, name: impl Into<String>, arguments: Value) -> Self {
        self.chats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(ChatReply::Call { name: name.into(), arguments });
        self
    }

    /// Number of `complete` calls made so far.
    #[must_use]
    pub fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    /// Number of `chat` calls made so far.
    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Prompts seen by `complete`, in call order.
    #[must_use]
    pub fn completion_prompts(&self) -> Vec<String> {
        self.seen_completion_prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The final user message of each `chat` call, in call order.
    #[must_use]
    pub fn chat_prompts(&self) -> Vec<String> {
        self.seen_chat_prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.seen_completion_prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(prompt.to_owned());
        let seq = self.completion_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .completions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| "{}".to_string());
        tracing::trace!(seq, %reply, "scripted completion");
        Ok(reply)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_embedding(text, self.embedding_dim))
    }

    async fn chat(&self, messages: &[ChatMessage], _options: ChatOptions) -> Result<ChatResponse> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.seen_chat_prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(last_user);
        let seq = self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .chats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| ChatReply::Text("done".to_string()));
        tracing::trace!(seq, ?reply, "scripted chat");
        let response = match reply {
            ChatReply::Text(text) => ChatResponse::text(text),
            ChatReply::Call { name, arguments } => ChatResponse {
                content: None,
                tool_calls: vec![ToolCall::new(format!("call_{seq}"), name, arguments)],
                usage: None,
            },
        };
        Ok(response.with_usage(self.usage_per_call))
    }
}
