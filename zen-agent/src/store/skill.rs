//! Skill store: concrete, executable knowledge.
//!
//! A skill is a trigger/command/condition triple — no abstraction, something
//! the agent can act on directly. Retrieval matches against
//! `"{trigger} {condition}"`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::LlmClient;
use crate::vector::{Embedded, Scored};

use super::{MemoryStore, Recallable};

/// A concrete, executable skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
    /// Stable identifier.
    pub id: String,
    /// The situation that calls for this skill.
    pub trigger: String,
    /// The concrete command or action to take.
    pub command: String,
    /// The condition under which the command applies.
    pub condition: String,
    /// Embedding over trigger + condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl SkillEntry {
    /// Create a new skill with a generated id.
    #[must_use]
    pub fn new(
        trigger: impl Into<String>,
        command: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trigger: trigger.into(),
            command: command.into(),
            condition: condition.into(),
            embedding: None,
        }
    }
}

impl Embedded for SkillEntry {
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

impl Recallable for SkillEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    fn embed_text(&self) -> String {
        format!("{} {}", self.trigger, self.condition)
    }
}

/// Typed store for [`SkillEntry`] values.
#[derive(Debug, Default)]
pub struct SkillStore {
    inner: MemoryStore<SkillEntry>,
}

impl SkillStore {
    /// Create a new skill store.
    #[must_use]
    pub fn new(embedder: Option<Arc<dyn LlmClient>>, path: Option<PathBuf>) -> Self {
        let mut inner = MemoryStore::new();
        if let Some(embedder) = embedder {
            inner = inner.with_embedder(embedder);
        }
        if let Some(path) = path {
            inner = inner.with_path(path);
        }
        Self { inner }
    }

    /// Load persisted skills; a missing file is fine.
    ///
    /// # Errors
    ///
    /// Returns a storage error when an existing file cannot be parsed.
    pub fn load(&mut self) -> Result<()> {
        self.inner.load()
    }

    /// Store a skill.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding fails.
    pub async fn store(&mut self, skill: SkillEntry) -> Result<()> {
        self.inner.store(skill).await
    }

    /// Retrieve the skills most relevant to `query`.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding the query fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Scored<SkillEntry>>> {
        self.inner.retrieve(query, k).await
    }

    /// All skills in insertion order.
    #[must_use]
    pub fn list(&self) -> &[SkillEntry] {
        self.inner.list()
    }

    /// Number of stored skills.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
