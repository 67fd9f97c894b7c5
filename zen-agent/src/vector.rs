//! Cosine similarity and top-K selection over embedding vectors.
//!
//! These are the scoring primitives the memory stores are built on. All
//! vectors are `f32`; stores are responsible for keeping dimensions uniform.

/// Error type for vector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum VectorError {
    /// The two vectors have different lengths.
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// Length of the left vector.
        left: usize,
        /// Length of the right vector.
        right: usize,
    },
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` when either vector has zero magnitude.
///
/// # Errors
///
/// Returns [`VectorError::DimensionMismatch`] when the lengths differ.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Anything that may carry an embedding vector.
pub trait Embedded {
    /// The embedding, if one has been generated.
    fn embedding(&self) -> Option<&[f32]>;
}

/// An item paired with its similarity score.
#[derive(Debug, Clone, Copy)]
pub struct Scored<T> {
    /// The scored item.
    pub item: T,
    /// Cosine similarity against the query.
    pub score: f32,
}

/// Return the `k` items most similar to `query`, highest score first.
///
/// Items without an embedding (or whose embedding length does not match the
/// query) are filtered out. Ties keep input order (the sort is stable).
pub fn top_k<'a, T: Embedded>(
    query: &[f32],
    items: impl IntoIterator<Item = &'a T>,
    k: usize,
) -> Vec<Scored<&'a T>> {
    let mut scored: Vec<Scored<&'a T>> = items
        .into_iter()
        .filter_map(|item| {
            let embedding = item.embedding()?;
            let score = cosine(query, embedding).ok()?;
            Some(Scored { item, score })
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Deterministic hash-based pseudo-embedding of fixed dimension.
///
/// Adapters without native embeddings may expose this as their `embed`
/// operation; they must declare the dimension they use. Tokens are hashed
/// (FNV-1a) into signed buckets and the result is L2-normalised, so equal
/// texts always produce equal vectors.
#[must_use]
pub fn hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dim.max(1)];
    for token in text.to_lowercase().split_whitespace() {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let bucket = (hash % out.len() as u64) as usize;
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign;
    }
    let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut out {
            *v /= norm;
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Item {
        name: &'static str,
        embedding: Option<Vec<f32>>,
    }

    impl Embedded for Item {
        fn embedding(&self) -> Option<&[f32]> {
            self.embedding.as_deref()
        }
    }

    mod cosine_fn {
        use super::*;

        #[test]
        fn identical_vectors_score_one() {
            let a = vec![0.5, -1.0, 2.0];
            let score = cosine(&a, &a).unwrap();
            assert!((score - 1.0).abs() < 1e-6);
        }

        #[test]
        fn opposite_vectors_score_minus_one() {
            let a = vec![1.0, 2.0, 3.0];
            let b: Vec<f32> = a.iter().map(|v| -v).collect();
            let score = cosine(&a, &b).unwrap();
            assert!((score + 1.0).abs() < 1e-6);
        }

        #[test]
        fn zero_magnitude_scores_zero() {
            assert_eq!(cosine(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
            assert_eq!(cosine(&[1.0, 2.0], &[0.0, 0.0]).unwrap(), 0.0);
        }

        #[test]
        fn mismatched_lengths_error() {
            let err = cosine(&[1.0], &[1.0, 2.0]).unwrap_err();
            assert_eq!(err, VectorError::DimensionMismatch { left: 1, right: 2 });
        }

        #[test]
        fn orthogonal_vectors_score_zero() {
            let score = cosine(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
            assert!(score.abs() < 1e-6);
        }
    }

    mod top_k_fn {
        use super::*;

        fn items() -> Vec<Item> {
            vec![
                Item { name: "exact", embedding: Some(vec![1.0, 0.0]) },
                Item { name: "orthogonal", embedding: Some(vec![0.0, 1.0]) },
                Item { name: "unembedded", embedding: None },
                Item { name: "close", embedding: Some(vec![0.9, 0.1]) },
            ]
        }

        #[test]
        fn ranks_by_similarity() {
            let items = items();
            let top = top_k(&[1.0, 0.0], &items, 2);
            assert_eq!(top.len(), 2);
            assert_eq!(top[0].item.name, "exact");
            assert_eq!(top[1].item.name, "close");
        }

        #[test]
        fn filters_unembedded_items() {
            let items = items();
            let top = top_k(&[1.0, 0.0], &items, 10);
            assert_eq!(top.len(), 3);
            assert!(top.iter().all(|s| s.item.name != "unembedded"));
        }

        #[test]
        fn ties_keep_input_order() {
            let items = vec![
                Item { name: "first", embedding: Some(vec![1.0, 0.0]) },
                Item { name: "second", embedding: Some(vec![1.0, 0.0]) },
            ];
            let top = top_k(&[1.0, 0.0], &items, 2);
            assert_eq!(top[0].item.name, "first");
            assert_eq!(top[1].item.name, "second");
        }

        #[test]
        fn empty_input_returns_empty() {
            let items: Vec<Item> = vec![];
            assert!(top_k(&[1.0], &items, 3).is_empty());
        }
    }

    mod hash_embedding_fn {
        use super::*;

        #[test]
        fn deterministic() {
            assert_eq!(hash_embedding("read the file", 32), hash_embedding("read the file", 32));
        }

        #[test]
        fn fixed_dimension() {
            assert_eq!(hash_embedding("anything", 64).len(), 64);
            assert_eq!(hash_embedding("", 64).len(), 64);
        }

        #[test]
        fn normalised_when_non_empty() {
            let v = hash_embedding("some text here", 32);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }

        #[test]
        fn similar_texts_are_closer_than_unrelated() {
            let a = hash_embedding("read config file", 64);
            let b = hash_embedding("read config file now", 64);
            let c = hash_embedding("unrelated words entirely different", 64);
            let close = cosine(&a, &b).unwrap();
            let far = cosine(&a, &c).unwrap();
            assert!(close > far);
        }
    }
}
