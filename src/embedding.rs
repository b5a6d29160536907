//! Embedding provider abstraction and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait and two implementations:
//! - **[`DisabledProvider`]**: always errors; used when embeddings are not configured.
//! - **[`OpenRouterProvider`]**: calls an OpenAI-compatible `/embeddings`
//!   endpoint (OpenRouter by default) with batching and retry.
//!
//! Batch responses carry an `index` per vector and may arrive in any order;
//! [`reassemble`] puts them back in input order and rejects anything that
//! does not line up one-to-one with the inputs.
//!
//! Vector helpers:
//! - [`cosine_similarity`]: similarity between two vectors, `None` when undefined
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding for SQLite
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::DigestError;
use crate::models::CuratedItem;
use crate::text::truncate_chars;

/// One vector from a batch call, tagged with the position of its input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"openai/text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the expected vector dimensionality, or 0 if unknown.
    fn dims(&self) -> usize;
    /// Embeds a batch. Results may come back in any order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenRouter Provider ============

/// Embedding provider for OpenAI-compatible `/embeddings` APIs.
///
/// Reads its key from `OPENROUTER_EMBEDDING_API_KEY`, falling back to
/// `OPENROUTER_API_KEY`, when built with [`OpenRouterProvider::from_env`].
pub struct OpenRouterProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenRouterProvider {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| {
                anyhow::anyhow!(
                    "OPENROUTER_EMBEDDING_API_KEY or OPENROUTER_API_KEY environment variable not set"
                )
            })?;
        Self::new(config, api_key)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await?;
                        return Ok(parsed
                            .data
                            .into_iter()
                            .enumerate()
                            .map(|(pos, d)| IndexedEmbedding {
                                index: d.index.unwrap_or(pos),
                                embedding: d.embedding,
                            })
                            .collect());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Create the [`EmbeddingProvider`] named by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openrouter" => Ok(Box::new(OpenRouterProvider::from_env(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Restores input order from an index-tagged batch.
///
/// Fails unless every index in `0..count` appears exactly once.
pub fn reassemble(
    count: usize,
    batch: Vec<IndexedEmbedding>,
) -> Result<Vec<Vec<f32>>, DigestError> {
    if batch.len() != count {
        return Err(DigestError::Embedding(format!(
            "expected {} embeddings, got {}",
            count,
            batch.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; count];
    for entry in batch {
        let slot = slots.get_mut(entry.index).ok_or_else(|| {
            DigestError::Embedding(format!("embedding index {} out of range", entry.index))
        })?;
        if slot.is_some() {
            return Err(DigestError::Embedding(format!(
                "duplicate embedding index {}",
                entry.index
            )));
        }
        *slot = Some(entry.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| DigestError::Embedding(format!("missing embedding {i}"))))
        .collect()
}

/// Embeds `texts` in one batch call and returns vectors in input order.
///
/// Each text is truncated to `max_chars` characters first.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    max_chars: usize,
) -> Result<Vec<Vec<f32>>, DigestError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let inputs: Vec<String> = texts
        .iter()
        .map(|t| truncate_chars(t, max_chars).to_string())
        .collect();

    let batch = provider
        .embed_batch(&inputs)
        .await
        .map_err(|e| DigestError::Embedding(format!("{e:#}")))?;

    let vectors = reassemble(texts.len(), batch)?;

    let dims = provider.dims();
    if dims > 0 {
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(DigestError::Embedding(format!(
                "expected {} dimensions, got {}",
                dims,
                bad.len()
            )));
        }
    }

    Ok(vectors)
}

/// Embeds a single search query.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    query: &str,
    max_chars: usize,
) -> Result<Vec<f32>, DigestError> {
    let mut vectors = embed_texts(provider, &[query.to_string()], max_chars).await?;
    vectors
        .pop()
        .ok_or_else(|| DigestError::Embedding("empty embedding response".to_string()))
}

/// Attaches embeddings to curated items in place.
///
/// Fail-soft: on any error the items are left without embeddings and the
/// error is logged. Returns how many items received a vector.
pub async fn attach_embeddings(
    provider: &dyn EmbeddingProvider,
    items: &mut [CuratedItem],
    max_chars: usize,
) -> usize {
    if items.is_empty() {
        return 0;
    }

    let texts: Vec<String> = items.iter().map(|i| i.embedding_text()).collect();
    match embed_texts(provider, &texts, max_chars).await {
        Ok(vectors) => {
            for (item, vector) in items.iter_mut().zip(vectors) {
                item.embedding = Some(vector);
            }
            items.len()
        }
        Err(e) => {
            warn!(error = %e, items = items.len(), "storing items without embeddings");
            0
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use daily_digest::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `None` for empty vectors, vectors of different lengths, or a
/// zero-norm vector, where the similarity is undefined.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    // f64 accumulation: squared f32 components over- and underflow in f32.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return None;
    }

    Some(sim.clamp(-1.0, 1.0) as f32)
}
