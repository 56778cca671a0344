//! Budgeted retrieval over the chunk index.
//!
//! [`Retriever::retrieve`] turns a [`RetrievalBudget`] into an effective
//! `k`, queries the [`Index`], then drops the lowest-ranked chunks until
//! the combined text fits `max_chars`.
//!
//! Emptiness is not an error: an empty scope or a scope with no indexed
//! chunks yields `Ok(vec![])`, and the caller falls back to open chat. A
//! blank query still returns the leading chunks in ordinal order.

use std::sync::Arc;

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::Result;
use crate::index::{Index, ScoredChunk};
use crate::models::{RetrievalBudget, Scope};
use crate::scoring::QueryFeatures;

/// A chunk selected for the prompt, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub score: f64,
    pub text: String,
    /// Set when the text was cut to fit the character budget.
    pub truncated: bool,
}

impl From<ScoredChunk> for RetrievedChunk {
    fn from(hit: ScoredChunk) -> Self {
        Self {
            chunk_id: hit.chunk.id,
            document_id: hit.chunk.document_id,
            ordinal: hit.chunk.ordinal,
            score: hit.score,
            text: hit.chunk.text,
            truncated: false,
        }
    }
}

impl RetrievedChunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

pub struct Retriever {
    index: Arc<Index>,
    embedder: Option<Arc<dyn Embedder>>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        index: Arc<Index>,
        embedder: Option<Arc<dyn Embedder>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    /// Default budget from `[retrieval]`.
    pub fn default_budget(&self) -> RetrievalBudget {
        RetrievalBudget::new(self.config.max_chunks, self.config.max_chars)
    }

    /// Number of chunks to request from the index for `budget`.
    pub fn effective_k(&self, budget: &RetrievalBudget) -> usize {
        budget
            .max_chunks
            .min(budget.max_chars / self.config.min_chunk_chars.max(1))
    }

    pub async fn retrieve(
        &self,
        scope: &Scope,
        query_text: &str,
        budget: &RetrievalBudget,
    ) -> Result<Vec<RetrievedChunk>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let k = self.effective_k(budget);
        if k == 0 {
            return Ok(Vec::new());
        }
        let available = self.index.chunks_in_scope(scope);
        if available == 0 {
            tracing::debug!(documents = scope.document_ids().len(), "no indexed chunks in scope");
            return Ok(Vec::new());
        }

        let features = self.query_features(query_text).await;
        let mut hits: Vec<RetrievedChunk> = self
            .index
            .query(scope, &features, k)
            .into_iter()
            .map(RetrievedChunk::from)
            .collect();

        // A blank query scores every chunk 0, leaving them in ordinal order.
        let blank = query_text.trim().is_empty();
        if let (Some(min_score), false) = (self.config.min_score, blank) {
            hits.retain(|h| h.score > min_score);
        }

        let candidates = hits.len();
        trim_to_budget(&mut hits, budget.max_chars);

        tracing::debug!(
            k,
            available,
            candidates,
            returned = hits.len(),
            scorer = self.index.scorer().name(),
            "retrieved chunks"
        );
        Ok(hits)
    }

    async fn query_features(&self, query_text: &str) -> QueryFeatures {
        let features = QueryFeatures::new(query_text);
        if !self.index.scorer().needs_embeddings() || query_text.trim().is_empty() {
            return features;
        }
        let Some(embedder) = &self.embedder else {
            return features;
        };
        match embed_query(embedder.as_ref(), query_text).await {
            Ok(vector) => features.with_embedding(vector),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "query embedding failed; using keyword scores");
                features
            }
        }
    }
}

/// Drop lowest-ranked chunks while the total exceeds `max_chars`.
///
/// The top-ranked chunk is never dropped; if it alone exceeds the budget
/// it is cut to `max_chars` characters.
fn trim_to_budget(hits: &mut Vec<RetrievedChunk>, max_chars: usize) {
    let mut total: usize = hits.iter().map(RetrievedChunk::char_len).sum();
    while hits.len() > 1 && total > max_chars {
        if let Some(dropped) = hits.pop() {
            total -= dropped.char_len();
        }
    }
    if let Some(top) = hits.first_mut() {
        if total > max_chars {
            top.text = top.text.chars().take(max_chars).collect();
            top.truncated = true;
        }
    }
}
