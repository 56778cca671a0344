//! Storage abstraction for documents and chunks.
//!
//! The [`DocumentStore`] trait is everything the pipeline needs from
//! persistence. Backends:
//!
//! - [`memory::InMemoryStore`]: `HashMap`s behind one `RwLock`; tests and
//!   hosts that bring their own persistence.
//! - [`crate::sqlite_store::SqliteStore`]: the SQLite database used by the
//!   CLI.
//!
//! Chunk rows are the source of truth for the in-memory index: stored
//! chunks (with their embeddings) are enough to rebuild it from scratch.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentStatus};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](DocumentStore::insert_document) | Record a new upload |
/// | [`get_document`](DocumentStore::get_document) | Fetch one document |
/// | [`update_status`](DocumentStore::update_status) | Move a document to a new status |
/// | [`reset_document`](DocumentStore::reset_document) | Drop chunks and return to `pending` |
/// | [`replace_chunks`](DocumentStore::replace_chunks) | Store chunks and mark `chunked` |
/// | [`mark_failed`](DocumentStore::mark_failed) | Drop chunks and mark `failed` |
/// | [`get_chunks`](DocumentStore::get_chunks) | A document's chunks by ordinal |
/// | [`list_documents`](DocumentStore::list_documents) | Documents of a conversation |
/// | [`list_chunked_documents`](DocumentStore::list_chunked_documents) | Everything indexable |
/// | [`delete_document`](DocumentStore::delete_document) | Cascade-delete one document |
/// | [`delete_conversation`](DocumentStore::delete_conversation) | Cascade-delete a conversation's documents |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Set the status and clear any stored error message.
    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<()>;

    /// Delete the document's chunks and set it back to `pending`, in one step.
    async fn reset_document(&self, id: &str) -> Result<()>;

    /// Replace all chunks of a document and mark it `chunked` with the new
    /// chunk count. All-or-nothing.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Delete the document's chunks and mark it `failed` with `error`.
    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    /// Chunks of a document in ordinal order, embeddings included.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Documents of a conversation in creation order.
    async fn list_documents(&self, conversation_id: &str) -> Result<Vec<Document>>;

    /// All `chunked` documents in creation order.
    async fn list_chunked_documents(&self) -> Result<Vec<Document>>;

    /// Delete a document and its chunks. Returns `false` if it did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Delete every document of a conversation with their chunks.
    /// Returns the deleted document ids.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<String>>;
}
