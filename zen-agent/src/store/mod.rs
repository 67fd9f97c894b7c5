//! The memory stack: embedding-indexed stores with JSON persistence.
//!
//! [`MemoryStore`] is the keyed collection everything else builds on. The
//! typed stores layer domain semantics over it:
//!
//! - [`SkillStore`](skill::SkillStore) — concrete, executable skills;
//! - [`FailureStore`](failure::FailureStore) — failure proverbs with a
//!   per-run session sub-list that survives Context Reset;
//! - [`KarmaStore`](karma::KarmaStore) — proverbs with causal provenance,
//!   reinforcement, and decayable transfer weights;
//! - [`PrajnaMemory`](prajna::PrajnaMemory) — three-layer hierarchical
//!   memory with consolidation.

pub mod failure;
pub mod karma;
pub mod prajna;
pub mod skill;

pub use failure::{FailureEntry, FailureStore, Severity};
pub use karma::{KarmaEntry, KarmaStore, KarmaType};
pub use prajna::{MemoryEntry, MemoryLayer, PrajnaConfig, PrajnaMemory};
pub use skill::{SkillEntry, SkillStore};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::llm::LlmClient;
use crate::vector::{Embedded, Scored, top_k};

/// An entry a [`MemoryStore`] can hold: identified, embeddable, serializable.
///
/// The embedding accessor itself comes from the [`Embedded`] supertrait so
/// entries plug straight into [`top_k`].
pub trait Recallable: Embedded + Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Stable identifier of the entry.
    fn id(&self) -> &str;

    /// Attach a generated embedding.
    fn set_embedding(&mut self, embedding: Vec<f32>);

    /// The text the embedding is generated from.
    fn embed_text(&self) -> String;
}

/// An embedding-indexed keyed collection with JSON persistence.
///
/// Entries keep insertion order; storing under an existing id replaces the
/// entry in place. When a path is set, every mutation persists the whole
/// store as pretty-printed JSON via an atomic rename. Persist failures are
/// logged and swallowed — the in-memory state continues and the next
/// successful write catches up.
pub struct MemoryStore<T: Recallable> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
    embedder: Option<Arc<dyn LlmClient>>,
    path: Option<PathBuf>,
    dim: Option<usize>,
}

impl<T: Recallable> MemoryStore<T> {
    /// Create an in-memory store with no embedder and no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            embedder: None,
            path: None,
            dim: None,
        }
    }

    /// Attach an embedder used to generate missing embeddings.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn LlmClient>) -> Self {
        self.dim = Some(embedder.embedding_dim());
        self.embedder = Some(embedder);
        self
    }

    /// Attach a JSON persistence path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Load entries from the persistence path.
    ///
    /// A missing file is tolerated silently; the store stays empty.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the file exists but cannot be read or
    /// parsed.
    pub fn load(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::storage(path.display().to_string(), e.to_string()))?;
        let entries: Vec<T> = serde_json::from_str(&data)
            .map_err(|e| AgentError::storage(path.display().to_string(), e.to_string()))?;
        self.entries = entries;
        self.reindex();
        debug!(count = self.entries.len(), path = %path.display(), "loaded store");
        Ok(())
    }

    /// Store an entry, generating its embedding when an embedder is
    /// configured and the entry has none, then persist.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding fails or the embedding dimension does
    /// not match the store's dimension.
    pub async fn store(&mut self, mut entry: T) -> Result<()> {
        if entry.embedding().is_none()
            && let Some(embedder) = &self.embedder
        {
            let vector = embedder.embed(&entry.embed_text()).await?;
            entry.set_embedding(vector);
        }
        if let Some(embedding) = entry.embedding() {
            match self.dim {
                Some(dim) if dim != embedding.len() => {
                    return Err(AgentError::config(format!(
                        "mixed embedding dimensions: store has {dim}, entry has {}",
                        embedding.len()
                    )));
                }
                Some(_) => {}
                None => self.dim = Some(embedding.len()),
            }
        }
        match self.index.get(entry.id()) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(entry.id().to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
        self.persist();
        Ok(())
    }

    /// Retrieve the `k` entries most similar to `query`.
    ///
    /// Without an embedder this degenerates to the first `k` entries in
    /// insertion order, each scored 0.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding the query fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Scored<T>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(self
                .entries
                .iter()
                .take(k)
                .map(|entry| Scored { item: entry.clone(), score: 0.0 })
                .collect());
        };
        let query_vector = embedder.embed(query).await?;
        Ok(top_k(&query_vector, &self.entries, k)
            .into_iter()
            .map(|scored| Scored { item: scored.item.clone(), score: scored.score })
            .collect())
    }

    /// Get an entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&position| &self.entries[position])
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn list(&self) -> &[T] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the first entry matching a predicate.
    #[must_use]
    pub fn find(&self, predicate: impl FnMut(&&T) -> bool) -> Option<&T> {
        self.entries.iter().find(predicate)
    }

    /// Apply `f` to every entry, drop entries failing `keep`, and persist.
    ///
    /// Used by decay passes that mutate and evict in one sweep.
    pub fn rewrite(&mut self, mut f: impl FnMut(&mut T), mut keep: impl FnMut(&T) -> bool) {
        for entry in &mut self.entries {
            f(entry);
        }
        self.entries.retain(|entry| keep(entry));
        self.reindex();
        self.persist();
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id().to_string(), position))
            .collect();
    }

    /// Write the whole store to disk via atomic rename. Best-effort.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_json_atomic(path, &self.entries) {
            warn!(path = %path.display(), error = %e, "failed to persist store");
        }
    }
}

impl<T: Recallable> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recallable + std::fmt::Debug> std::fmt::Debug for MemoryStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Serialize `value` as pretty JSON and atomically rename it into `path`.
///
/// Readers always see either the pre- or post-state of a single write.
pub(crate) fn write_json_atomic<V: Serialize>(path: &Path, value: &V) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        embedding: Option<Vec<f32>>,
    }

    impl Note {
        fn new(id: &str, text: &str) -> Self {
            Self { id: id.into(), text: text.into(), embedding: None }
        }
    }

    impl Embedded for Note {
        fn embedding(&self) -> Option<&[f32]> {
            self.embedding.as_deref()
        }
    }

    impl Recallable for Note {
        fn id(&self) -> &str {
            &self.id
        }
        fn set_embedding(&mut self, embedding: Vec<f32>) {
            self.embedding = Some(embedding);
        }
        fn embed_text(&self) -> String {
            self.text.clone()
        }
    }

    #[tokio::test]
    async fn store_generates_embedding_when_embedder_configured() {
        let mut store = MemoryStore::new().with_embedder(Arc::new(ScriptedLlm::new()));
        store.store(Note::new("1", "read the file")).await.unwrap();
        assert!(store.get("1").unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn store_replaces_entry_with_same_id_in_place() {
        let mut store = MemoryStore::new();
        store.store(Note::new("1", "old")).await.unwrap();
        store.store(Note::new("2", "other")).await.unwrap();
        store.store(Note::new("1", "new")).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.list()[0].text, "new");
    }

    #[tokio::test]
    async fn retrieve_ranks_by_similarity() {
        let mut store = MemoryStore::new().with_embedder(Arc::new(ScriptedLlm::new()));
        store.store(Note::new("1", "read the configuration file")).await.unwrap();
        store.store(Note::new("2", "launch rockets into orbit")).await.unwrap();
        let hits = store.retrieve("read a file", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.id, "1");
    }

    #[tokio::test]
    async fn retrieve_without_embedder_returns_insertion_order() {
        let mut store = MemoryStore::new();
        store.store(Note::new("a", "first")).await.unwrap();
        store.store(Note::new("b", "second")).await.unwrap();
        store.store(Note::new("c", "third")).await.unwrap();
        let hits = store.retrieve("anything", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.id, "a");
        assert_eq!(hits[1].item.id, "b");
    }

    #[tokio::test]
    async fn mixed_dimensions_are_rejected() {
        let mut store = MemoryStore::new();
        let mut first = Note::new("1", "x");
        first.embedding = Some(vec![1.0, 0.0]);
        store.store(first).await.unwrap();

        let mut second = Note::new("2", "y");
        second.embedding = Some(vec![1.0, 0.0, 0.0]);
        let err = store.store(second).await.unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let mut store = MemoryStore::new()
            .with_embedder(Arc::new(ScriptedLlm::new()))
            .with_path(&path);
        store.store(Note::new("1", "alpha")).await.unwrap();
        store.store(Note::new("2", "beta")).await.unwrap();
        let before: Vec<Note> = store.list().to_vec();

        let mut reloaded: MemoryStore<Note> = MemoryStore::new().with_path(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.list(), before.as_slice());
    }

    #[test]
    fn load_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: MemoryStore<Note> =
            MemoryStore::new().with_path(dir.path().join("absent.json"));
        store.load().unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rewrite_mutates_and_evicts() {
        let mut store = MemoryStore::new();
        store.store(Note::new("keep", "x")).await.unwrap();
        store.store(Note::new("drop", "y")).await.unwrap();
        store.rewrite(
            |note| note.text.push('!'),
            |note| note.id == "keep",
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("keep").unwrap().text, "x!");
        assert!(store.get("drop").is_none());
    }
}
