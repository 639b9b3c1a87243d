//! Vector embedding abstraction layer.
//!
//! The similarity memory never computes embeddings itself; it calls an
//! [`Embedder`].  The production implementation is a thin HTTP client
//! for an external embedding service.  A deterministic in-process
//! provider is included for tests and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::EmbeddingError;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts in one call.
    ///
    /// Returns exactly one vector per input, all of the same length.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] if the service fails or answers with
    /// anything other than one equal-length numeric vector per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// A human-readable name for the provider.
    fn model_name(&self) -> &str;
}

/// Check that a raw service response is one equal-length numeric vector per input.
///
/// # Errors
///
/// Returns [`EmbeddingError::Malformed`] describing the first violation.
pub fn validate_embeddings(response: &Value, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let rows = response
        .as_array()
        .ok_or_else(|| EmbeddingError::Malformed(format!("expected an array, got {response}")))?;

    if rows.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {expected} embeddings, got {}",
            rows.len()
        )));
    }

    let mut vectors = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let values = row
            .as_array()
            .ok_or_else(|| EmbeddingError::Malformed(format!("embedding {i} is not an array")))?;
        let vector = values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| EmbeddingError::Malformed(format!("embedding {i} is not numeric")))?;
        vectors.push(vector);
    }

    if let Some(first) = vectors.first() {
        let dims = first.len();
        if dims == 0 {
            return Err(EmbeddingError::Malformed("embedding has zero dimensions".into()));
        }
        if let Some(i) = vectors.iter().position(|v| v.len() != dims) {
            return Err(EmbeddingError::Malformed(format!(
                "embedding {i} has {} dimensions, expected {dims}",
                vectors[i].len()
            )));
        }
    }

    Ok(vectors)
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// Client for an embedding service that accepts `{ "text": [...] }` and
/// answers with a JSON array of vectors.
pub struct HttpEmbeddingClient {
    http: Client,
    endpoint_url: String,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
}

impl HttpEmbeddingClient {
    /// Create a client for `endpoint_url` (the full URL of the embed route).
    #[must_use]
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint_url: endpoint_url.into(),
            api_key: None,
            timeout_ms: None,
        }
    }

    /// Send a bearer token with every request. Empty keys are ignored.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = self.http.post(&self.endpoint_url).json(&json!({ "text": texts }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        let resp = builder.send().await?;
        if !resp.status().is_success() {
            return Err(EmbeddingError::Request(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        let vectors = validate_embeddings(&body, texts.len())?;
        debug!(count = vectors.len(), "embedded batch");
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.endpoint_url
    }
}

// ---------------------------------------------------------------------------
// Hashing provider (deterministic, offline)
// ---------------------------------------------------------------------------

/// Bag-of-words embeddings via feature hashing.
///
/// Each lowercase alphanumeric word increments one of `dims` buckets and
/// the result is L2-normalized, so texts sharing words land close
/// together.  Deterministic across runs.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    /// Create a hashing provider with `dimensions` buckets (at least 1).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions.max(1) }
    }

    /// Embed one text.
    #[must_use]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let mag = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > f32::EPSILON {
            for x in &mut vector {
                *x /= mag;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_matching_batch() {
        let body = json!([[0.1, 0.2], [0.3, 0.4]]);
        let vectors = validate_embeddings(&body, 2).expect("valid");
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.4]);
    }

    #[test]
    fn validate_rejects_wrong_arity() {
        let body = json!([[0.1, 0.2]]);
        assert!(matches!(
            validate_embeddings(&body, 2),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn validate_rejects_non_numeric() {
        let body = json!([[0.1, "x"]]);
        assert!(validate_embeddings(&body, 1).is_err());
        let body = json!({ "embeddings": [] });
        assert!(validate_embeddings(&body, 0).is_err());
    }

    #[test]
    fn validate_rejects_ragged_vectors() {
        let body = json!([[0.1, 0.2], [0.3]]);
        assert!(validate_embeddings(&body, 2).is_err());
    }

    #[tokio::test]
    async fn hashing_embeds_one_vector_per_text() {
        let provider = HashingEmbedder::new(4);
        let out = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .expect("embed");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.len() == 4));
    }

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let provider = HashingEmbedder::new(64);
        let a = provider.embed_one("The reactor hums");
        let b = provider.embed_one("the REACTOR hums");
        assert_eq!(a, b);
        let mag: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((mag - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_empty_text_is_zero_vector() {
        let provider = HashingEmbedder::new(8);
        assert!(provider.embed_one("  ...  ").iter().all(|&x| x == 0.0));
    }
}
