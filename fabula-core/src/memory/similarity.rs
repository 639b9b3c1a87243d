//! Similarity-search memory: an append-only store of texts and their
//! embeddings, answering "what older text is closest to this?".

use std::fmt;
use std::sync::Arc;

use fabula_llm::{Embedder, EmbeddingError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::index::VectorIndex;

/// Who produced a stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    /// The player.
    Human,
    /// The storyteller.
    Ai,
    /// Anything else (seeded notes, summaries).
    Note,
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Ai => write!(f, "ai"),
            Self::Note => write!(f, "note"),
        }
    }
}

/// One stored text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// The text as inserted.
    pub text: String,
    /// Who produced it.
    pub role: MemoryRole,
}

/// Nearest-first query answer.  `texts[i]` is at `distances[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Matching texts, nearest first.
    pub texts: Vec<String>,
    /// Squared Euclidean distances, ascending.
    pub distances: Vec<f32>,
}

impl QueryResult {
    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Embedding-backed long-term memory.
pub struct SimilaritySearchMemory {
    embedder: Arc<dyn Embedder>,
    records: Vec<MemoryRecord>,
    index: VectorIndex,
}

impl SimilaritySearchMemory {
    /// Create an empty memory.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            records: Vec::new(),
            index: VectorIndex::new(),
        }
    }

    /// Builder: switch from exhaustive search to HNSW at this many entries.
    #[must_use]
    pub fn with_brute_force_threshold(mut self, threshold: usize) -> Self {
        self.index = VectorIndex::with_brute_force_threshold(threshold);
        self
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stored entries in insertion order.
    #[must_use]
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Store texts as [`MemoryRole::Note`] entries.
    ///
    /// # Errors
    ///
    /// See [`insert_with_role`](Self::insert_with_role).
    pub async fn insert(&mut self, texts: &[String]) -> Result<()> {
        let entries: Vec<(MemoryRole, String)> = texts.iter().map(|t| (MemoryRole::Note, t.clone())).collect();
        self.insert_with_role(&entries).await
    }

    /// Embed all texts in one call and store them.
    ///
    /// Either every entry is stored or none is.  An empty batch does not
    /// call the embedding service.
    ///
    /// # Errors
    ///
    /// Returns [`FabulaError::EmbeddingService`](crate::FabulaError::EmbeddingService)
    /// if the call fails, returns the wrong number of vectors, or returns
    /// vectors whose dimension differs from what is already stored.
    pub async fn insert_with_role(&mut self, entries: &[(MemoryRole, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = entries.iter().map(|(_, t)| t.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != entries.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                entries.len(),
                vectors.len()
            ))
            .into());
        }

        let expected = self.index.dimensions().unwrap_or_else(|| vectors[0].len());
        if expected == 0 {
            return Err(EmbeddingError::Malformed("embedding has zero dimensions".into()).into());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::Malformed(format!(
                "embedding dimension {} does not match {expected}",
                bad.len()
            ))
            .into());
        }

        for ((role, text), vector) in entries.iter().zip(vectors) {
            self.index.insert(vector);
            self.records.push(MemoryRecord {
                text: text.clone(),
                role: *role,
            });
        }
        self.index.maybe_rebuild();
        debug!(added = entries.len(), total = self.records.len(), "stored memories");
        Ok(())
    }

    /// Find the `top_k` stored texts nearest to `text`.
    ///
    /// `top_k` is clamped to the number of entries.  An empty memory
    /// answers without calling the embedding service.
    ///
    /// # Errors
    ///
    /// Returns [`FabulaError::EmbeddingService`](crate::FabulaError::EmbeddingService)
    /// if the query cannot be embedded.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<QueryResult> {
        if self.records.is_empty() || top_k == 0 {
            return Ok(QueryResult::default());
        }

        let vectors = self.embedder.embed(&[text.to_string()]).await?;
        let query = match vectors.as_slice() {
            [v] if Some(v.len()) == self.index.dimensions() => v,
            _ => {
                return Err(EmbeddingError::Malformed(format!(
                    "query embedding does not match stored dimension {:?}",
                    self.index.dimensions()
                ))
                .into());
            }
        };

        let hits = self.index.search(query, top_k);
        Ok(QueryResult {
            texts: hits.iter().map(|h| self.records[h.position].text.clone()).collect(),
            distances: hits.iter().map(|h| h.distance).collect(),
        })
    }

    /// Like [`query`](Self::query), but a failure only costs the memories.
    pub async fn recall(&self, text: &str, top_k: usize) -> Vec<String> {
        match self.query(text, top_k).await {
            Ok(result) => result.texts,
            Err(e) => {
                warn!(error = %e, "memory recall failed, continuing without memories");
                Vec::new()
            }
        }
    }
}
