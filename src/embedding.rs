//! Embedding providers and vector utilities.
//!
//! Defines the async [`Embedder`] trait and its implementations:
//! - **[`HashedEmbedder`]**: deterministic feature-hashing vectors computed
//!   locally; no model, no network. Useful for tests and offline setups.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API with retry and
//!   backoff.
//!
//! Embeddings are optional everywhere: [`create_embedder`] returns `None`
//! when `embedding.provider = "disabled"`, and the pipeline falls back to
//! term-frequency scoring.
//!
//! Vectors are persisted next to their chunk as little-endian `f32`
//! blobs ([`vec_to_blob`] / [`blob_to_vec`]) so the index can be rebuilt
//! without calling the provider again.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::scoring::tokenize;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// An embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    /// Length of every vector this embedder returns.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`, checking the shape of every
/// response.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "{} returned {} embeddings for {} inputs",
                embedder.model_name(),
                vectors.len(),
                batch.len()
            );
        }
        for v in &vectors {
            if v.len() != embedder.dims() {
                bail!(
                    "{} returned a {}-dimensional vector, expected {}",
                    embedder.model_name(),
                    v.len(),
                    embedder.dims()
                );
            }
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embed_all(embedder, &[text.to_string()], 1).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("{} returned no vector for the query", embedder.model_name()))
}

// ============ Hashed Embedder ============

/// Local embedder that hashes each token into one of `dims` buckets with
/// a ±1 sign, then L2-normalizes.
///
/// Texts sharing vocabulary get similar vectors, which is enough for a
/// lexical "semantic" scorer without shipping a model.
pub struct HashedEmbedder {
    dims: usize,
}

impl HashedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn model_name(&self) -> &str {
        "hashed"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI Embedder ============

/// Remote embedder backed by the OpenAI embeddings endpoint.
///
/// The API key is read from `OPENAI_API_KEY` when the embedder is built.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Outcome of one HTTP attempt.
enum Attempt {
    Done(Vec<Vec<f32>>),
    Retry(anyhow::Error),
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (Some(model), Some(dims)) = (config.model.clone(), config.dims) else {
            bail!("embedding.model and embedding.dims are required for the openai provider");
        };
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set for the openai embedding provider")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn attempt(&self, texts: &[String]) -> Result<Attempt> {
        let sent = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()
            .await;
        let response = match sent {
            Ok(r) => r,
            Err(e) => return Ok(Attempt::Retry(e.into())),
        };

        let status = response.status();
        if status.is_success() {
            let parsed: EmbeddingResponse = response
                .json()
                .await
                .context("Malformed embeddings response")?;
            return Ok(Attempt::Done(order_by_index(parsed)));
        }

        let detail = response.text().await.unwrap_or_default();
        let err = anyhow!("embeddings request failed with {}: {}", status, detail);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Ok(Attempt::Retry(err))
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    /// Rate limits, server errors and transport errors are retried with
    /// exponential backoff (1s doubling, capped at 32s). Other client
    /// errors fail at once.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err = anyhow!("no embedding attempt made");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, model = %self.model, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }
            match self.attempt(texts).await? {
                Attempt::Done(vectors) => return Ok(vectors),
                Attempt::Retry(e) => last_err = e,
            }
        }
        Err(last_err.context(format!(
            "embedding failed after {} attempts",
            self.max_retries + 1
        )))
    }
}

/// Vectors in input order. Items without an `index` keep their position.
fn order_by_index(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut items: Vec<(usize, Vec<f32>)> = response
        .data
        .into_iter()
        .enumerate()
        .map(|(pos, item)| (item.index.unwrap_or(pos), item.embedding))
        .collect();
    items.sort_by_key(|(i, _)| *i);
    items.into_iter().map(|(_, v)| v).collect()
}

/// Build the embedder selected by `embedding.provider` (`disabled`,
/// `hashed` or `openai`). `disabled` yields `None`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "hashed" => {
            let dims = config
                .dims
                .context("embedding.dims is required for the hashed provider")?;
            Ok(Some(Arc::new(HashedEmbedder::new(dims))))
        }
        "openai" => Ok(Some(Arc::new(OpenAIEmbedder::new(config)?))),
        other => bail!("unknown embedding provider '{}'", other),
    }
}

/// Little-endian `f32` bytes, as stored in the `chunks.embedding` column.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` when the vectors differ in
/// length or either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, na, nb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    let denom = na.sqrt() * nb.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
