//! In-memory chunk index with pluggable scoring.
//!
//! Holds each document's chunk set together with precomputed term
//! statistics, keyed by document id. A document's entries live in one
//! immutable `Arc` snapshot that [`Index::add`] swaps in whole, so a
//! concurrent query sees either the previous chunk set or the new one,
//! never a mix.
//!
//! The index owns nothing durable: every entry is derived from stored
//! chunk rows and can be rebuilt from the store at any time.
//!
//! # Ranking
//!
//! [`Index::query`] scores every chunk in scope with the configured
//! [`Scorer`] and sorts by:
//! 1. score (descending)
//! 2. chunk ordinal (ascending)
//! 3. document creation time (ascending)
//! 4. document id (ascending)
//!
//! Creation time comes from the stored [`Document`](crate::models::Document)
//! record, so a live index and one rebuilt from the store rank alike.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Chunk, Scope};
use crate::scoring::{QueryFeatures, Scorer, TermStats};

/// A chunk plus the relevance features computed at index time.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub terms: TermStats,
}

impl IndexedChunk {
    pub fn new(chunk: Chunk) -> Self {
        let terms = TermStats::from_text(&chunk.text);
        Self { chunk, terms }
    }
}

/// A ranked query hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub score: f64,
    #[serde(flatten)]
    pub chunk: Chunk,
}

#[derive(Debug)]
struct DocEntry {
    created_at: DateTime<Utc>,
    chunks: Vec<IndexedChunk>,
}

#[derive(Default)]
struct IndexState {
    docs: HashMap<String, Arc<DocEntry>>,
}

pub struct Index {
    scorer: Arc<dyn Scorer>,
    state: RwLock<IndexState>,
}

impl Index {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self {
            scorer,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }

    /// Replace the document's chunk set.
    ///
    /// `created_at` is the document's creation time and orders equally
    /// scored chunks across documents. Features are computed before the
    /// write lock is taken; the swap itself is a single map insert. Adding
    /// an empty set removes the document.
    pub fn add(&self, document_id: &str, created_at: DateTime<Utc>, chunks: Vec<Chunk>) {
        if chunks.is_empty() {
            self.remove(document_id);
            return;
        }
        let mut indexed: Vec<IndexedChunk> = chunks.into_iter().map(IndexedChunk::new).collect();
        indexed.sort_by_key(|c| c.chunk.ordinal);
        let entry = Arc::new(DocEntry {
            created_at,
            chunks: indexed,
        });

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.docs.insert(document_id.to_string(), entry);
    }

    /// Drop every entry of the document. No-op if it was never indexed.
    pub fn remove(&self, document_id: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.docs.remove(document_id);
    }

    /// Top-`k` chunks of the documents in `scope`.
    pub fn query(&self, scope: &Scope, query: &QueryFeatures, k: usize) -> Vec<ScoredChunk> {
        if k == 0 || scope.is_empty() {
            return Vec::new();
        }

        let snapshot: Vec<(String, Arc<DocEntry>)> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            scope
                .document_ids()
                .iter()
                .filter_map(|id| state.docs.get(id).map(|e| (id.clone(), Arc::clone(e))))
                .collect()
        };

        let mut scored: Vec<(f64, DateTime<Utc>, &str, &IndexedChunk)> = Vec::new();
        for (doc_id, entry) in &snapshot {
            for chunk in &entry.chunks {
                let score = self.scorer.score(query, chunk);
                scored.push((score, entry.created_at, doc_id.as_str(), chunk));
            }
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.3.chunk.ordinal.cmp(&b.3.chunk.ordinal))
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(b.2))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(score, _, _, c)| ScoredChunk {
                score,
                chunk: c.chunk.clone(),
            })
            .collect()
    }

    /// Total number of indexed chunks.
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.docs.values().map(|e| e.chunks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn document_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.docs.len()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.docs.contains_key(document_id)
    }

    /// Number of chunks indexed for the documents in `scope`.
    pub fn chunks_in_scope(&self, scope: &Scope) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        scope
            .document_ids()
            .iter()
            .filter_map(|id| state.docs.get(id))
            .map(|e| e.chunks.len())
            .sum()
    }

    /// Chunk ids of a document in ordinal order.
    pub fn chunk_ids(&self, document_id: &str) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .docs
            .get(document_id)
            .map(|e| e.chunks.iter().map(|c| c.chunk.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.docs.clear();
    }
}
