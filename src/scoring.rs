//! Pluggable relevance scoring.
//!
//! The index ranks chunks through the [`Scorer`] trait only. Three
//! scorers are provided:
//!
//! | Name | Scorer | Score |
//! |------|--------|-------|
//! | `keyword` | [`TermFrequencyScorer`] | cosine of term-frequency vectors |
//! | `semantic` | [`VectorScorer`] | cosine of embedding vectors |
//! | `hybrid` | [`HybridScorer`] | `(1 - α) × keyword + α × semantic` |
//!
//! Vector scorers fall back to keyword scoring when the query carries no
//! embedding (embedder disabled or failing), so retrieval degrades
//! instead of failing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::index::IndexedChunk;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "i",
    "in", "is", "it", "of", "on", "or", "our", "that", "the", "this", "to", "was", "we", "were",
    "what", "with", "you", "your",
];

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Term counts of a text, stopwords removed, with a precomputed L2 norm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermStats {
    counts: HashMap<String, u32>,
    norm: f64,
}

impl TermStats {
    pub fn from_text(text: &str) -> Self {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            if STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }
        let norm = counts
            .values()
            .map(|&c| (c as f64) * (c as f64))
            .sum::<f64>()
            .sqrt();
        Self { counts, norm }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, term: &str) -> u32 {
        self.counts.get(term).copied().unwrap_or(0)
    }

    /// Cosine similarity in `[0, 1]`.
    pub fn cosine(&self, other: &TermStats) -> f64 {
        if self.norm == 0.0 || other.norm == 0.0 {
            return 0.0;
        }
        let (small, large) = if self.counts.len() <= other.counts.len() {
            (self, other)
        } else {
            (other, self)
        };
        let dot: f64 = small
            .counts
            .iter()
            .map(|(term, &c)| c as f64 * large.count(term) as f64)
            .sum();
        dot / (self.norm * other.norm)
    }
}

/// Everything a scorer may use about the query.
#[derive(Debug, Clone)]
pub struct QueryFeatures {
    pub text: String,
    pub terms: TermStats,
    pub embedding: Option<Vec<f32>>,
}

impl QueryFeatures {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            terms: TermStats::from_text(text),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Relevance of one indexed chunk to a query. Higher is better.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, query: &QueryFeatures, chunk: &IndexedChunk) -> f64;
    /// Whether queries should be embedded before scoring.
    fn needs_embeddings(&self) -> bool {
        false
    }
}

pub struct TermFrequencyScorer;

impl Scorer for TermFrequencyScorer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn score(&self, query: &QueryFeatures, chunk: &IndexedChunk) -> f64 {
        query.terms.cosine(&chunk.terms)
    }
}

pub struct VectorScorer;

impl Scorer for VectorScorer {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn score(&self, query: &QueryFeatures, chunk: &IndexedChunk) -> f64 {
        match (&query.embedding, &chunk.chunk.embedding) {
            (Some(q), Some(c)) => cosine_similarity(q, c) as f64,
            (Some(_), None) => 0.0,
            (None, _) => query.terms.cosine(&chunk.terms),
        }
    }

    fn needs_embeddings(&self) -> bool {
        true
    }
}

/// Weighted blend: `(1 - α) × keyword + α × semantic`.
pub struct HybridScorer {
    alpha: f64,
}

impl HybridScorer {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }
}

impl Scorer for HybridScorer {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn score(&self, query: &QueryFeatures, chunk: &IndexedChunk) -> f64 {
        let keyword = query.terms.cosine(&chunk.terms);
        let Some(q) = &query.embedding else {
            return keyword;
        };
        let semantic = chunk
            .chunk
            .embedding
            .as_ref()
            .map(|c| cosine_similarity(q, c) as f64)
            .unwrap_or(0.0);
        (1.0 - self.alpha) * keyword + self.alpha * semantic
    }

    fn needs_embeddings(&self) -> bool {
        true
    }
}

/// Instantiate the scorer named by `retrieval.scorer`.
pub fn create_scorer(config: &RetrievalConfig) -> Result<Arc<dyn Scorer>> {
    match config.scorer.as_str() {
        "keyword" => Ok(Arc::new(TermFrequencyScorer)),
        "semantic" => Ok(Arc::new(VectorScorer)),
        "hybrid" => Ok(Arc::new(HybridScorer::new(config.hybrid_alpha))),
        other => Err(RagError::Configuration(format!(
            "Unknown retrieval.scorer: '{}'. Use keyword, semantic, or hybrid.",
            other
        ))),
    }
}
