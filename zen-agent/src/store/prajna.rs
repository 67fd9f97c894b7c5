//! Hierarchical memory: working, episodic, and semantic layers.
//!
//! New observations land in the working layer. A periodic consolidation
//! pass decays relevance, promotes entries that keep earning access, and
//! evicts what faded. Working memory is transient; the episodic and
//! semantic layers are persisted after each consolidation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::LlmClient;
use crate::vector::cosine;

use super::write_json_atomic;

/// The layer a memory currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    /// Fresh observations; decays fastest, never persisted.
    Working,
    /// Memories that earned a second look.
    Episodic,
    /// Long-term knowledge; pinned at full relevance.
    Semantic,
}

/// One hierarchical memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Stable identifier.
    pub id: String,
    /// Current layer.
    pub layer: MemoryLayer,
    /// The remembered content.
    pub content: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Relevance score in `[0, 1]`.
    pub relevance: f32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last retrieval time.
    pub last_accessed: DateTime<Utc>,
    /// Number of retrievals.
    pub access_count: u32,
    /// Optional embedding of the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    fn new(content: String, metadata: serde_json::Value, relevance: f32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            layer: MemoryLayer::Working,
            content,
            metadata,
            relevance: relevance.clamp(0.0, 1.0),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            embedding: None,
        }
    }
}

/// Tuning knobs for consolidation.
#[derive(Debug, Clone, Copy)]
pub struct PrajnaConfig {
    /// Relevance subtracted from working entries per consolidation.
    pub working_decay: f32,
    /// Relevance subtracted from episodic entries per consolidation.
    pub episodic_decay: f32,
    /// Base threshold for relevance-driven promotion out of working.
    pub promotion_threshold: f32,
    /// Maximum episodic entries before the lowest-relevance one is evicted.
    pub episodic_capacity: usize,
}

impl Default for PrajnaConfig {
    fn default() -> Self {
        Self {
            working_decay: 0.1,
            episodic_decay: 0.05,
            promotion_threshold: 0.5,
            episodic_capacity: 50,
        }
    }
}

/// A memory entry returned from retrieval, with its combined score.
#[derive(Debug, Clone)]
pub struct Recalled {
    /// The retrieved entry.
    pub entry: MemoryEntry,
    /// Combined similarity × relevance × access score.
    pub score: f32,
}

/// Three-layer hierarchical memory.
pub struct PrajnaMemory {
    working: HashMap<String, MemoryEntry>,
    episodic: HashMap<String, MemoryEntry>,
    semantic: HashMap<String, MemoryEntry>,
    config: PrajnaConfig,
    embedder: Option<Arc<dyn LlmClient>>,
    dir: Option<PathBuf>,
}

impl PrajnaMemory {
    /// Create a new hierarchical memory.
    #[must_use]
    pub fn new(config: PrajnaConfig) -> Self {
        Self {
            working: HashMap::new(),
            episodic: HashMap::new(),
            semantic: HashMap::new(),
            config,
            embedder: None,
            dir: None,
        }
    }

    /// Attach an embedder for similarity scoring.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn LlmClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach a persistence directory for the episodic and semantic layers.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Load persisted episodic and semantic entries; a missing file is fine.
    ///
    /// # Errors
    ///
    /// Returns a storage error when an existing file cannot be parsed.
    pub fn load(&mut self) -> Result<()> {
        let Some(path) = self.file_path() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&path)?;
        let entries: Vec<MemoryEntry> = serde_json::from_str(&data)?;
        for entry in entries {
            match entry.layer {
                MemoryLayer::Episodic => self.episodic.insert(entry.id.clone(), entry),
                MemoryLayer::Semantic => self.semantic.insert(entry.id.clone(), entry),
                MemoryLayer::Working => None,
            };
        }
        debug!(
            episodic = self.episodic.len(),
            semantic = self.semantic.len(),
            "loaded hierarchical memory"
        );
        Ok(())
    }

    /// Record a new observation into the working layer.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding fails.
    pub async fn remember(
        &mut self,
        content: impl Into<String>,
        metadata: serde_json::Value,
        relevance: f32,
    ) -> Result<String> {
        let mut entry = MemoryEntry::new(content.into(), metadata, relevance);
        if let Some(embedder) = &self.embedder {
            entry.embedding = Some(embedder.embed(&entry.content).await?);
        }
        let id = entry.id.clone();
        self.working.insert(id.clone(), entry);
        Ok(id)
    }

    /// Retrieve the `k` memories most relevant to `query`, across layers.
    ///
    /// Scores combine similarity with `relevance × (access_count + 1)`.
    /// Layers are searched semantic-first so ties favour longer-term
    /// knowledge. Retrieved entries get their access counter bumped and
    /// `last_accessed` refreshed.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding the query fails.
    pub async fn recall(&mut self, query: &str, k: usize) -> Result<Vec<Recalled>> {
        let query_embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(query).await?),
            None => None,
        };

        let mut scored: Vec<(MemoryLayer, String, f32)> = Vec::new();
        for (layer, map) in [
            (MemoryLayer::Semantic, &self.semantic),
            (MemoryLayer::Episodic, &self.episodic),
            (MemoryLayer::Working, &self.working),
        ] {
            for entry in map.values() {
                let similarity = similarity(query, query_embedding.as_deref(), entry);
                let score = similarity * entry.relevance * (entry.access_count + 1) as f32;
                scored.push((layer, entry.id.clone(), score));
            }
        }
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let now = Utc::now();
        let mut recalled = Vec::with_capacity(scored.len());
        for (layer, id, score) in scored {
            let map = self.layer_mut(layer);
            if let Some(entry) = map.get_mut(&id) {
                entry.access_count += 1;
                entry.last_accessed = now;
                recalled.push(Recalled { entry: entry.clone(), score });
            }
        }
        Ok(recalled)
    }

    /// Run one consolidation pass.
    ///
    /// 1. Decay working relevance; evict entries reaching ≤ 0.
    /// 2. Promote working → episodic on access ≥ 2 or relevance ≥
    ///    threshold + 0.3; promotion boosts relevance by 0.1 (cap 1.0).
    /// 3. Decay episodic relevance; evict at ≤ 0.
    /// 4. Promote episodic → semantic on access ≥ 5 and relevance ≥ 0.5;
    ///    relevance is pinned to 1.0.
    /// 5. Over capacity, evict the single lowest-relevance episodic entry.
    ///
    /// The episodic and semantic layers are persisted afterwards.
    pub fn consolidate(&mut self) {
        let decay = self.config.working_decay;
        for entry in self.working.values_mut() {
            entry.relevance -= decay;
        }
        self.working.retain(|_, entry| entry.relevance > 0.0);

        let promote_at = self.config.promotion_threshold + 0.3;
        let promoted: Vec<String> = self
            .working
            .values()
            .filter(|e| e.access_count >= 2 || e.relevance >= promote_at)
            .map(|e| e.id.clone())
            .collect();
        for id in promoted {
            if let Some(mut entry) = self.working.remove(&id) {
                entry.layer = MemoryLayer::Episodic;
                entry.relevance = (entry.relevance + 0.1).min(1.0);
                self.episodic.insert(id, entry);
            }
        }

        let decay = self.config.episodic_decay;
        for entry in self.episodic.values_mut() {
            entry.relevance -= decay;
        }
        self.episodic.retain(|_, entry| entry.relevance > 0.0);

        let promoted: Vec<String> = self
            .episodic
            .values()
            .filter(|e| e.access_count >= 5 && e.relevance >= 0.5)
            .map(|e| e.id.clone())
            .collect();
        for id in promoted {
            if let Some(mut entry) = self.episodic.remove(&id) {
                entry.layer = MemoryLayer::Semantic;
                entry.relevance = 1.0;
                self.semantic.insert(id, entry);
            }
        }

        if self.episodic.len() > self.config.episodic_capacity {
            let weakest = self
                .episodic
                .values()
                .min_by(|a, b| {
                    a.relevance.partial_cmp(&b.relevance).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|e| e.id.clone());
            if let Some(id) = weakest {
                self.episodic.remove(&id);
            }
        }

        self.persist();
    }

    /// Number of entries in a layer.
    #[must_use]
    pub fn layer_len(&self, layer: MemoryLayer) -> usize {
        match layer {
            MemoryLayer::Working => self.working.len(),
            MemoryLayer::Episodic => self.episodic.len(),
            MemoryLayer::Semantic => self.semantic.len(),
        }
    }

    /// All entries of a layer, in no particular order.
    #[must_use]
    pub fn layer_entries(&self, layer: MemoryLayer) -> Vec<&MemoryEntry> {
        match layer {
            MemoryLayer::Working => self.working.values().collect(),
            MemoryLayer::Episodic => self.episodic.values().collect(),
            MemoryLayer::Semantic => self.semantic.values().collect(),
        }
    }

    fn layer_mut(&mut self, layer: MemoryLayer) -> &mut HashMap<String, MemoryEntry> {
        match layer {
            MemoryLayer::Working => &mut self.working,
            MemoryLayer::Episodic => &mut self.episodic,
            MemoryLayer::Semantic => &mut self.semantic,
        }
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join("prajna_memory.json"))
    }

    fn persist(&self) {
        let Some(path) = self.file_path() else {
            return;
        };
        let mut durable: Vec<&MemoryEntry> = self
            .episodic
            .values()
            .chain(self.semantic.values())
            .collect();
        durable.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Err(e) = write_json_atomic(&path, &durable) {
            warn!(path = %path.display(), error = %e, "failed to persist hierarchical memory");
        }
    }
}

impl std::fmt::Debug for PrajnaMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrajnaMemory")
            .field("working", &self.working.len())
            .field("episodic", &self.episodic.len())
            .field("semantic", &self.semantic.len())
            .finish_non_exhaustive()
    }
}

/// Similarity of an entry to the query: cosine when both sides have
/// embeddings, otherwise keyword overlap scoped to this store.
fn similarity(query: &str, query_embedding: Option<&[f32]>, entry: &MemoryEntry) -> f32 {
    if let (Some(q), Some(e)) = (query_embedding, entry.embedding.as_deref())
        && let Ok(score) = cosine(q, e)
    {
        return score;
    }
    keyword_overlap(query, &entry.content)
}

fn keyword_overlap(a: &str, b: &str) -> f32 {
    let a_tokens: std::collections::HashSet<String> =
        a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let b_tokens: std::collections::HashSet<String> =
        b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let shared = a_tokens.intersection(&b_tokens).count();
    shared as f32 / a_tokens.len().max(b_tokens.len()) as f32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn memory() -> PrajnaMemory {
        PrajnaMemory::new(PrajnaConfig::default())
    }

    #[tokio::test]
    async fn remember_lands_in_working() {
        let mut prajna = memory();
        prajna.remember("saw a file", serde_json::json!({}), 0.5).await.unwrap();
        assert_eq!(prajna.layer_len(MemoryLayer::Working), 1);
        assert_eq!(prajna.layer_len(MemoryLayer::Episodic), 0);
    }

    #[tokio::test]
    async fn consolidation_decays_and_evicts_working() {
        let mut prajna = memory();
        prajna.remember("faint", serde_json::json!({}), 0.05).await.unwrap();
        prajna.consolidate();
        assert_eq!(prajna.layer_len(MemoryLayer::Working), 0);
        assert_eq!(prajna.layer_len(MemoryLayer::Episodic), 0);
    }

    #[tokio::test]
    async fn high_relevance_promotes_to_episodic_with_boost() {
        let mut prajna = memory();
        prajna.remember("important", serde_json::json!({}), 1.0).await.unwrap();
        prajna.consolidate();

        assert_eq!(prajna.layer_len(MemoryLayer::Episodic), 1);
        let entries = prajna.layer_entries(MemoryLayer::Episodic);
        // 1.0 decayed by 0.1, boosted by 0.1 on promotion (cap 1.0),
        // then decayed by the episodic 0.05 in the same pass.
        assert!((entries[0].relevance - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn access_count_promotes_to_episodic() {
        let mut prajna = memory();
        prajna.remember("frequently used fact", serde_json::json!({}), 0.4).await.unwrap();
        prajna.recall("frequently used fact", 1).await.unwrap();
        prajna.recall("frequently used fact", 1).await.unwrap();
        prajna.consolidate();
        assert_eq!(prajna.layer_len(MemoryLayer::Episodic), 1);
    }

    #[tokio::test]
    async fn heavily_accessed_episodic_promotes_to_semantic_pinned() {
        let mut prajna = memory();
        prajna.remember("core knowledge fact", serde_json::json!({}), 1.0).await.unwrap();
        prajna.consolidate();
        for _ in 0..5 {
            prajna.recall("core knowledge fact", 1).await.unwrap();
        }
        prajna.consolidate();

        assert_eq!(prajna.layer_len(MemoryLayer::Semantic), 1);
        let entries = prajna.layer_entries(MemoryLayer::Semantic);
        assert_eq!(entries[0].relevance, 1.0);
    }

    #[tokio::test]
    async fn capacity_evicts_single_lowest_relevance_entry() {
        let mut prajna = PrajnaMemory::new(PrajnaConfig {
            episodic_capacity: 2,
            ..PrajnaConfig::default()
        });
        for relevance in [1.0f32, 0.95, 0.9] {
            prajna
                .remember(format!("fact {relevance}"), serde_json::json!({}), relevance)
                .await
                .unwrap();
        }
        prajna.consolidate();

        assert_eq!(prajna.layer_len(MemoryLayer::Episodic), 2);
        let survivors = prajna.layer_entries(MemoryLayer::Episodic);
        assert!(survivors.iter().all(|e| e.content != "fact 0.9"));
    }

    #[tokio::test]
    async fn recall_bumps_access_bookkeeping() {
        let mut prajna = memory();
        prajna.remember("observed behaviour", serde_json::json!({}), 0.8).await.unwrap();
        let hits = prajna.recall("observed behaviour", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.access_count, 1);
    }

    #[tokio::test]
    async fn persists_durable_layers_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut prajna = memory().with_dir(dir.path());
        prajna.remember("promoted memory", serde_json::json!({}), 1.0).await.unwrap();
        prajna.remember("transient memory", serde_json::json!({}), 0.2).await.unwrap();
        prajna.consolidate();

        let mut reloaded = memory().with_dir(dir.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.layer_len(MemoryLayer::Episodic), 1);
        assert_eq!(reloaded.layer_len(MemoryLayer::Working), 0);
    }
}
