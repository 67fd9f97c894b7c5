//! Failure store: universally-framed wisdom derived from failures.
//!
//! Besides the persistent collection, the store tracks which proverbs were
//! recorded during the current run. That sub-list is exported before a
//! Context Reset truncates the chat history and carried into the fresh
//! system message, then cleared.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::LlmClient;
use crate::vector::{Embedded, Scored};

use super::{MemoryStore, Recallable};

/// How severe the triggering failure was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Minor friction; worth remembering.
    Low,
    /// Cost real progress.
    Med,
    /// Endangered the run.
    High,
}

/// A failure proverb with its triggering context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    /// Stable identifier.
    pub id: String,
    /// Universally-framed wisdom distilled from the failure.
    pub proverb: String,
    /// The condition under which the failure occurred.
    pub condition: String,
    /// Severity of the failure.
    pub severity: Severity,
    /// Embedding over proverb + condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl FailureEntry {
    /// Create a new failure entry with a generated id.
    #[must_use]
    pub fn new(
        proverb: impl Into<String>,
        condition: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            proverb: proverb.into(),
            condition: condition.into(),
            severity,
            embedding: None,
        }
    }
}

impl Embedded for FailureEntry {
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

impl Recallable for FailureEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    fn embed_text(&self) -> String {
        format!("{} {}", self.proverb, self.condition)
    }
}

/// Typed store for [`FailureEntry`] values with a per-run session sub-list.
#[derive(Debug, Default)]
pub struct FailureStore {
    inner: MemoryStore<FailureEntry>,
    session: Vec<String>,
}

impl FailureStore {
    /// Create a new failure store.
    #[must_use]
    pub fn new(embedder: Option<Arc<dyn LlmClient>>, path: Option<PathBuf>) -> Self {
        let mut inner = MemoryStore::new();
        if let Some(embedder) = embedder {
            inner = inner.with_embedder(embedder);
        }
        if let Some(path) = path {
            inner = inner.with_path(path);
        }
        Self { inner, session: Vec::new() }
    }

    /// Load persisted failures; a missing file is fine.
    ///
    /// # Errors
    ///
    /// Returns a storage error when an existing file cannot be parsed.
    pub fn load(&mut self) -> Result<()> {
        self.inner.load()
    }

    /// Store a failure and record it in the current session.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding fails.
    pub async fn store(&mut self, failure: FailureEntry) -> Result<()> {
        let id = failure.id.clone();
        self.inner.store(failure).await?;
        self.session.push(id);
        Ok(())
    }

    /// Retrieve the failures most relevant to `query`.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding the query fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Scored<FailureEntry>>> {
        self.inner.retrieve(query, k).await
    }

    /// Failures recorded during the current session, in order.
    #[must_use]
    pub fn export_current(&self) -> Vec<FailureEntry> {
        self.session
            .iter()
            .filter_map(|id| self.inner.get(id).cloned())
            .collect()
    }

    /// Clear the current session sub-list. The entries stay stored.
    pub fn clear_current_session(&mut self) {
        self.session.clear();
    }

    /// All failures in insertion order.
    #[must_use]
    pub fn list(&self) -> &[FailureEntry] {
        self.inner.list()
    }

    /// Number of stored failures.
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
