//! In-memory [`DocumentStore`] implementation for tests and embedding.
//!
//! Documents and chunks share one `std::sync::RwLock`, so every
//! multi-step operation (replace, fail, cascade delete) is atomic.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{Chunk, Document, DocumentStatus};

use super::DocumentStore;

struct StoredDoc {
    /// Insertion order, breaks `created_at` ties.
    seq: u64,
    doc: Document,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, StoredDoc>,
    chunks: HashMap<String, Vec<Chunk>>,
    next_seq: u64,
}

impl State {
    fn doc_mut(&mut self, id: &str) -> Result<&mut Document> {
        match self.docs.get_mut(id) {
            Some(stored) => Ok(&mut stored.doc),
            None => bail!("document not found: {}", id),
        }
    }

    fn sorted<'a>(&self, docs: impl Iterator<Item = &'a StoredDoc>) -> Vec<Document> {
        let mut docs: Vec<&StoredDoc> = docs.collect();
        docs.sort_by(|a, b| {
            a.doc
                .created_at
                .cmp(&b.doc.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        docs.into_iter().map(|s| s.doc.clone()).collect()
    }
}

/// In-memory store for testing.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write();
        if state.docs.contains_key(&doc.id) {
            bail!("document already exists: {}", doc.id);
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.docs.insert(
            doc.id.clone(),
            StoredDoc {
                seq,
                doc: doc.clone(),
            },
        );
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read().docs.get(id).map(|s| s.doc.clone()))
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let mut state = self.write();
        let doc = state.doc_mut(id)?;
        doc.status = status;
        doc.error = None;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_document(&self, id: &str) -> Result<()> {
        let mut state = self.write();
        let doc = state.doc_mut(id)?;
        doc.status = DocumentStatus::Pending;
        doc.error = None;
        doc.chunk_count = 0;
        doc.updated_at = Utc::now();
        state.chunks.remove(id);
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.write();
        let doc = state.doc_mut(document_id)?;
        doc.status = DocumentStatus::Chunked;
        doc.error = None;
        doc.chunk_count = chunks.len();
        doc.updated_at = Utc::now();
        let mut sorted = chunks.to_vec();
        sorted.sort_by_key(|c| c.ordinal);
        state.chunks.insert(document_id.to_string(), sorted);
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let mut state = self.write();
        let doc = state.doc_mut(id)?;
        doc.status = DocumentStatus::Failed;
        doc.error = Some(error.to_string());
        doc.chunk_count = 0;
        doc.updated_at = Utc::now();
        state.chunks.remove(id);
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .read()
            .chunks
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_documents(&self, conversation_id: &str) -> Result<Vec<Document>> {
        let state = self.read();
        Ok(state.sorted(
            state
                .docs
                .values()
                .filter(|s| s.doc.conversation_id == conversation_id),
        ))
    }

    async fn list_chunked_documents(&self) -> Result<Vec<Document>> {
        let state = self.read();
        Ok(state.sorted(
            state
                .docs
                .values()
                .filter(|s| s.doc.status == DocumentStatus::Chunked),
        ))
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut state = self.write();
        state.chunks.remove(id);
        Ok(state.docs.remove(id).is_some())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<String>> {
        let mut state = self.write();
        let ids: Vec<String> = state
            .sorted(
                state
                    .docs
                    .values()
                    .filter(|s| s.doc.conversation_id == conversation_id),
            )
            .into_iter()
            .map(|d| d.id)
            .collect();
        for id in &ids {
            state.docs.remove(id);
            state.chunks.remove(id);
        }
        Ok(ids)
    }
}
