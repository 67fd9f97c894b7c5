//! Karma store: proverbs with causal provenance, reinforcement, and decay.
//!
//! Two rules set this store apart from the plain failure store:
//!
//! - storing a proverb that already exists **merges** instead of inserting:
//!   occurrences go up, the transfer weight is reinforced by 0.1 (capped at
//!   1.0), and the causal chains are unioned;
//! - transfer weights **decay**: `apply_impermanence` is run exactly once at
//!   the end of each agent run, and entries whose weight reaches zero are
//!   forgotten.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::LlmClient;
use crate::vector::{Embedded, Scored};

use super::failure::Severity;
use super::{MemoryStore, Recallable};

/// Whether the remembered pattern helped or hurt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KarmaType {
    /// A pattern worth repeating.
    Skillful,
    /// A pattern worth avoiding.
    Unskillful,
}

/// A karmic memory: a proverb with provenance and a decayable weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KarmaEntry {
    /// Stable identifier.
    pub id: String,
    /// The distilled wisdom.
    pub proverb: String,
    /// The condition under which it was learned.
    pub condition: String,
    /// Severity of the originating event.
    pub severity: Severity,
    /// Where the karma came from (tool name, plugin, peer agent).
    pub source: String,
    /// Ids of earlier karmas that causally led to this one, earliest first.
    #[serde(default)]
    pub causal_chain: Vec<String>,
    /// How strongly this karma transfers to new situations, in `[0, 1]`.
    pub transfer_weight: f32,
    /// Skillful or unskillful.
    pub karma_type: KarmaType,
    /// How many times this proverb has been reinforced.
    pub occurrences: u32,
    /// Last time the proverb was seen.
    pub last_seen: DateTime<Utc>,
    /// Embedding over proverb + condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl KarmaEntry {
    /// Create a new karma entry with a generated id.
    #[must_use]
    pub fn new(
        proverb: impl Into<String>,
        condition: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
        karma_type: KarmaType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            proverb: proverb.into(),
            condition: condition.into(),
            severity,
            source: source.into(),
            causal_chain: Vec::new(),
            transfer_weight: 0.5,
            karma_type,
            occurrences: 1,
            last_seen: Utc::now(),
            embedding: None,
        }
    }

    /// Set the causal chain.
    #[must_use]
    pub fn with_causal_chain(mut self, chain: Vec<String>) -> Self {
        self.causal_chain = chain;
        self
    }

    /// Set the transfer weight.
    #[must_use]
    pub const fn with_transfer_weight(mut self, weight: f32) -> Self {
        self.transfer_weight = weight;
        self
    }
}

impl Embedded for KarmaEntry {
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

impl Recallable for KarmaEntry {
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

/// Summary counters exposed in the run state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KarmaMetrics {
    /// Total stored entries.
    pub total: usize,
    /// Entries marked skillful.
    pub skillful: usize,
    /// Entries marked unskillful.
    pub unskillful: usize,
    /// Mean transfer weight across entries.
    pub avg_transfer_weight: f32,
}

/// Typed store for [`KarmaEntry`] values with reinforcement and decay.
#[derive(Debug, Default)]
pub struct KarmaStore {
    inner: MemoryStore<KarmaEntry>,
}

impl KarmaStore {
    /// Create a new karma store.
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

    /// Load persisted karma; a missing file is fine.
    ///
    /// # Errors
    ///
    /// Returns a storage error when an existing file cannot be parsed.
    pub fn load(&mut self) -> Result<()> {
        self.inner.load()
    }

    /// Store a karma entry, merging when the proverb already exists.
    ///
    /// Merging increments occurrences, reinforces the transfer weight by 0.1
    /// (capped at 1.0), unions the causal chains, refreshes `last_seen`, and
    /// re-embeds. Returns the id of the stored (or merged-into) entry.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding fails.
    pub async fn store(&mut self, entry: KarmaEntry) -> Result<String> {
        let existing = self.inner.find(|stored| stored.proverb == entry.proverb).cloned();
        match existing {
            Some(mut merged) => {
                merged.occurrences += 1;
                merged.transfer_weight = (merged.transfer_weight + 0.1).min(1.0);
                for link in &entry.causal_chain {
                    if !merged.causal_chain.contains(link) {
                        merged.causal_chain.push(link.clone());
                    }
                }
                merged.condition = entry.condition;
                merged.last_seen = Utc::now();
                merged.embedding = None;
                let id = merged.id.clone();
                self.inner.store(merged).await?;
                Ok(id)
            }
            None => {
                let id = entry.id.clone();
                self.inner.store(entry).await?;
                Ok(id)
            }
        }
    }

    /// Retrieve karma ranked by cosine similarity × transfer weight.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding the query fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Scored<KarmaEntry>>> {
        let mut scored = self.inner.retrieve(query, self.inner.len()).await?;
        for hit in &mut scored {
            hit.score *= hit.item.transfer_weight;
        }
        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Follow an entry's causal chain, earliest first.
    ///
    /// Unknown ids and self-references are skipped; an unknown root yields an
    /// empty chain. Chains are stored flat and never followed transitively,
    /// so cycles cannot recurse.
    #[must_use]
    pub fn trace_causal_chain(&self, id: &str) -> Vec<KarmaEntry> {
        let Some(root) = self.inner.get(id) else {
            return Vec::new();
        };
        root.causal_chain
            .iter()
            .filter(|link| link.as_str() != id)
            .filter_map(|link| self.inner.get(link).cloned())
            .collect()
    }

    /// Entries reinforced at least `min_occurrences` times.
    #[must_use]
    pub fn habitual_patterns(&self, min_occurrences: u32) -> Vec<KarmaEntry> {
        self.inner
            .list()
            .iter()
            .filter(|entry| entry.occurrences >= min_occurrences)
            .cloned()
            .collect()
    }

    /// Decay every transfer weight by `rate`, evicting entries at or below 0.
    ///
    /// Run exactly once at the end of each agent run.
    pub fn apply_impermanence(&mut self, rate: f32) {
        self.inner.rewrite(
            |entry| entry.transfer_weight = (entry.transfer_weight - rate).max(0.0),
            |entry| entry.transfer_weight > 0.0,
        );
    }

    /// Prepend `earlier_id` to the causal chain of `later_id`.
    ///
    /// Used by causal analysis when two consecutive failures are linked.
    /// Returns false when either id is unknown or the ids are equal.
    pub fn link_causal(&mut self, later_id: &str, earlier_id: &str) -> bool {
        if later_id == earlier_id || self.inner.get(earlier_id).is_none() {
            return false;
        }
        let mut linked = false;
        self.inner.rewrite(
            |entry| {
                if entry.id == later_id && !entry.causal_chain.iter().any(|l| l == earlier_id) {
                    entry.causal_chain.insert(0, earlier_id.to_string());
                    linked = true;
                }
            },
            |_| true,
        );
        linked
    }

    /// Get an entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&KarmaEntry> {
        self.inner.get(id)
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn list(&self) -> &[KarmaEntry] {
        self.inner.list()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Summary counters for the run state.
    #[must_use]
    pub fn metrics(&self) -> KarmaMetrics {
        let entries = self.inner.list();
        let total = entries.len();
        let skillful = entries.iter().filter(|e| e.karma_type == KarmaType::Skillful).count();
        let weight_sum: f32 = entries.iter().map(|e| e.transfer_weight).sum();
        KarmaMetrics {
            total,
            skillful,
            unskillful: total - skillful,
            avg_transfer_weight: if total == 0 { 0.0 } else { weight_sum / total as f32 },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(proverb: &str) -> KarmaEntry {
        KarmaEntry::new(proverb, "testing", Severity::Med, "test", KarmaType::Unskillful)
    }

    mod merging {
        use super::*;

        #[tokio::test]
        async fn same_proverb_merges_into_one_entry() {
            let mut store = KarmaStore::new(None, None);
            store.store(entry("look before you leap")).await.unwrap();
            store.store(entry("look before you leap")).await.unwrap();

            assert_eq!(store.len(), 1);
            let merged = &store.list()[0];
            assert_eq!(merged.occurrences, 2);
            assert!((merged.transfer_weight - 0.6).abs() < 1e-6);
        }

        #[tokio::test]
        async fn transfer_weight_caps_at_one() {
            let mut store = KarmaStore::new(None, None);
            store
                .store(entry("patience").with_transfer_weight(0.95))
                .await
                .unwrap();
            store.store(entry("patience")).await.unwrap();
            assert!((store.list()[0].transfer_weight - 1.0).abs() < 1e-6);
        }

        #[tokio::test]
        async fn merge_unions_causal_chains() {
            let mut store = KarmaStore::new(None, None);
            store
                .store(entry("cause and effect").with_causal_chain(vec!["a".into()]))
                .await
                .unwrap();
            store
                .store(entry("cause and effect").with_causal_chain(vec!["a".into(), "b".into()]))
                .await
                .unwrap();
            assert_eq!(store.list()[0].causal_chain, vec!["a".to_string(), "b".to_string()]);
        }
    }

    mod impermanence {
        use super::*;

        #[tokio::test]
        async fn decays_all_weights() {
            let mut store = KarmaStore::new(None, None);
            store.store(entry("a").with_transfer_weight(0.5)).await.unwrap();
            store.store(entry("b").with_transfer_weight(0.8)).await.unwrap();

            store.apply_impermanence(0.2);

            let weights: Vec<f32> = store.list().iter().map(|e| e.transfer_weight).collect();
            assert!((weights[0] - 0.3).abs() < 1e-6);
            assert!((weights[1] - 0.6).abs() < 1e-6);
        }

        #[tokio::test]
        async fn evicts_entries_reaching_zero() {
            let mut store = KarmaStore::new(None, None);
            store.store(entry("fading").with_transfer_weight(0.1)).await.unwrap();
            store.store(entry("lasting").with_transfer_weight(0.9)).await.unwrap();

            store.apply_impermanence(0.1);

            assert_eq!(store.len(), 1);
            assert_eq!(store.list()[0].proverb, "lasting");
            assert!(store.list().iter().all(|e| e.transfer_weight > 0.0));
        }
    }

    mod causal_chain {
        use super::*;

        #[tokio::test]
        async fn traces_chain_in_order() {
            let mut store = KarmaStore::new(None, None);
            let root = store.store(entry("root")).await.unwrap();
            let effect1 = store
                .store(entry("effect1").with_causal_chain(vec![root.clone()]))
                .await
                .unwrap();
            let effect2 = store
                .store(entry("effect2").with_causal_chain(vec![root.clone(), effect1.clone()]))
                .await
                .unwrap();

            let chain = store.trace_causal_chain(&effect2);
            assert_eq!(chain.len(), 2);
            assert_eq!(chain[0].proverb, "root");
            assert_eq!(chain[1].proverb, "effect1");
        }

        #[tokio::test]
        async fn unknown_root_yields_empty_chain() {
            let store = KarmaStore::new(None, None);
            assert!(store.trace_causal_chain("missing").is_empty());
        }

        #[tokio::test]
        async fn self_reference_is_skipped() {
            let mut store = KarmaStore::new(None, None);
            let id = store.store(entry("loop")).await.unwrap();
            store.link_causal(&id, &id);
            assert!(store.trace_causal_chain(&id).is_empty());
        }

        #[tokio::test]
        async fn link_causal_prepends() {
            let mut store = KarmaStore::new(None, None);
            let earlier = store.store(entry("earlier")).await.unwrap();
            let later = store
                .store(entry("later").with_causal_chain(vec!["other".into()]))
                .await
                .unwrap();

            assert!(store.link_causal(&later, &earlier));
            assert_eq!(store.get(&later).unwrap().causal_chain[0], earlier);
        }
    }

    mod retrieval {
        use super::*;
        use crate::llm::mock::ScriptedLlm;

        #[tokio::test]
        async fn weight_scales_ranking() {
            let mut store = KarmaStore::new(Some(Arc::new(ScriptedLlm::new())), None);
            store
                .store(
                    KarmaEntry::new(
                        "heavy wisdom",
                        "reading files carefully",
                        Severity::Med,
                        "t",
                        KarmaType::Skillful,
                    )
                    .with_transfer_weight(1.0),
                )
                .await
                .unwrap();
            store
                .store(
                    KarmaEntry::new(
                        "faint wisdom",
                        "reading files carefully",
                        Severity::Med,
                        "t",
                        KarmaType::Skillful,
                    )
                    .with_transfer_weight(0.1),
                )
                .await
                .unwrap();

            let hits = store.retrieve("reading files carefully", 2).await.unwrap();
            assert_eq!(hits[0].item.proverb, "heavy wisdom");
            assert!(hits[0].score > hits[1].score);
        }
    }

    mod habitual {
        use super::*;

        #[tokio::test]
        async fn filters_by_occurrences() {
            let mut store = KarmaStore::new(None, None);
            store.store(entry("habit")).await.unwrap();
            store.store(entry("habit")).await.unwrap();
            store.store(entry("habit")).await.unwrap();
            store.store(entry("once")).await.unwrap();

            let habitual = store.habitual_patterns(3);
            assert_eq!(habitual.len(), 1);
            assert_eq!(habitual[0].proverb, "habit");
        }
    }

    #[tokio::test]
    async fn metrics_counts_types() {
        let mut store = KarmaStore::new(None, None);
        store.store(entry("bad")).await.unwrap();
        store
            .store(KarmaEntry::new("good", "c", Severity::Low, "t", KarmaType::Skillful))
            .await
            .unwrap();

        let metrics = store.metrics();
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.skillful, 1);
        assert_eq!(metrics.unskillful, 1);
        assert!(metrics.avg_transfer_weight > 0.0);
    }
}
