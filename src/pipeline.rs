//! Ingestion and query orchestration.
//!
//! [`RagPipeline`] wires the stages together:
//!
//! ```text
//! ingest:  bytes ─▶ extract ─▶ clean ─▶ chunk ─▶ (embed) ─▶ store ─▶ index
//! answer:  query ─▶ retrieve (index) ─▶ build prompt
//! ```
//!
//! # Ingestion
//!
//! Each call ingests one document as an independent unit of work.
//! CPU-bound stages run on tokio's blocking pool. At most one ingestion
//! (or delete) per document id is in flight at a time; a second call is
//! rejected with [`RagError::IngestionInProgress`].
//!
//! Chunks are written to the store in one transaction first and only then
//! swapped into the index, so queries never see a partial chunk set. A
//! failed ingestion marks the document `failed` and leaves no chunk rows
//! and no index entries behind. Re-ingesting is always safe.
//!
//! Embedding failures are not ingestion failures: chunks are stored
//! without vectors and scored by keywords.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chunk::Chunker;
use crate::clean::clean_text;
use crate::config::Config;
use crate::embedding::{create_embedder, embed_all, Embedder};
use crate::error::{RagError, Result};
use crate::extract::extract;
use crate::index::Index;
use crate::models::{
    Chunk, ConversationMode, Document, DocumentStatus, IngestResult, RetrievalBudget, Scope, Turn,
};
use crate::prompt::{Prompt, PromptBuilder};
use crate::retrieve::{RetrievedChunk, Retriever};
use crate::scoring::create_scorer;
use crate::sqlite_store::SqliteStore;
use crate::store::DocumentStore;

/// Prompt plus the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerContext {
    pub prompt: Prompt,
    /// Empty when the prompt is a plain open-chat prompt.
    pub used_chunk_ids: Vec<String>,
}

/// Document ids with an ingestion or delete in progress.
#[derive(Default)]
struct InFlight {
    ids: Mutex<HashSet<String>>,
}

/// Releases the document id when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    id: String,
}

impl InFlight {
    fn acquire(&self, id: &str) -> Result<InFlightGuard<'_>> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return Err(RagError::IngestionInProgress(id.to_string()));
        }
        Ok(InFlightGuard {
            in_flight: self,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut ids = self
            .in_flight
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ids.remove(&self.id);
    }
}

pub struct RagPipeline {
    config: Config,
    store: Arc<dyn DocumentStore>,
    index: Arc<Index>,
    chunker: Chunker,
    retriever: Retriever,
    prompt_builder: PromptBuilder,
    embedder: Option<Arc<dyn Embedder>>,
    in_flight: InFlight,
}

impl RagPipeline {
    /// Build a pipeline with the embedder named in `[embedding]`.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)
            .map_err(|e| RagError::Configuration(format!("{:#}", e)))?;
        Self::with_embedder(config, store, embedder)
    }

    /// Build a pipeline with an explicit embedder (or none).
    pub fn with_embedder(
        config: Config,
        store: Arc<dyn DocumentStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        config.validate()?;
        let scorer = create_scorer(&config.retrieval)?;
        if scorer.needs_embeddings() && embedder.is_none() {
            return Err(RagError::Configuration(format!(
                "retrieval.scorer '{}' requires an embedder",
                config.retrieval.scorer
            )));
        }
        let index = Arc::new(Index::new(scorer));
        let chunker = Chunker::new(config.chunking.clone())?;
        let retriever = Retriever::new(
            Arc::clone(&index),
            embedder.clone(),
            config.retrieval.clone(),
        );
        let prompt_builder = PromptBuilder::new(config.prompt.clone());
        Ok(Self {
            config,
            store,
            index,
            chunker,
            retriever,
            prompt_builder,
            embedder,
            in_flight: InFlight::default(),
        })
    }

    /// Open the SQLite store named in `[db]` and load its chunks into
    /// the index.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config).await?;
        let pipeline = Self::new(config, Arc::new(store))?;
        let documents = pipeline.rebuild_index().await?;
        tracing::debug!(documents, "pipeline ready");
        Ok(pipeline)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Default retrieval budget from `[retrieval]`.
    pub fn default_budget(&self) -> RetrievalBudget {
        self.retriever.default_budget()
    }

    /// Record a new upload in `pending` state.
    pub async fn create_document(
        &self,
        conversation_id: &str,
        filename: &str,
        media_type: &str,
    ) -> Result<Document> {
        let doc = Document::new(conversation_id, filename, media_type);
        self.store
            .insert_document(&doc)
            .await
            .map_err(RagError::Storage)?;
        tracing::debug!(document_id = %doc.id, conversation_id, filename, "document created");
        Ok(doc)
    }

    pub async fn document(&self, document_id: &str) -> Result<Option<Document>> {
        self.store
            .get_document(document_id)
            .await
            .map_err(RagError::Storage)
    }

    pub async fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.store
            .get_chunks(document_id)
            .await
            .map_err(RagError::Storage)
    }

    pub async fn documents(&self, conversation_id: &str) -> Result<Vec<Document>> {
        self.store
            .list_documents(conversation_id)
            .await
            .map_err(RagError::Storage)
    }

    /// Chunked documents of a conversation, in creation order.
    pub async fn scope_for_conversation(&self, conversation_id: &str) -> Result<Scope> {
        let docs = self.documents(conversation_id).await?;
        Ok(Scope::documents(
            docs.into_iter()
                .filter(|d| d.status == DocumentStatus::Chunked)
                .map(|d| d.id),
        ))
    }

    /// Turn an uploaded byte stream into stored, indexed chunks.
    ///
    /// On failure the document is left `failed` with the error message and
    /// the error is returned.
    pub async fn ingest(
        &self,
        document_id: &str,
        bytes: Vec<u8>,
        media_type: &str,
    ) -> Result<IngestResult> {
        let _guard = self.in_flight.acquire(document_id)?;

        let doc = self
            .document(document_id)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))?;
        doc.status.transition(DocumentStatus::Pending)?;

        self.store
            .reset_document(document_id)
            .await
            .map_err(RagError::Storage)?;
        self.index.remove(document_id);

        let started = Instant::now();
        tracing::info!(document_id, media_type, bytes = bytes.len(), "ingesting document");

        match self
            .run_stages(document_id, doc.created_at, bytes, media_type)
            .await
        {
            Ok(chunk_count) => {
                tracing::info!(
                    document_id,
                    chunks = chunk_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "document ingested"
                );
                Ok(IngestResult {
                    document_id: document_id.to_string(),
                    status: DocumentStatus::Chunked,
                    chunk_count,
                })
            }
            Err(RagError::DocumentNotFound(_)) => {
                tracing::info!(document_id, "document deleted during ingestion");
                Err(RagError::DocumentNotFound(document_id.to_string()))
            }
            Err(e) => {
                tracing::warn!(document_id, error = %e, "ingestion failed");
                self.index.remove(document_id);
                if let Err(store_err) = self.store.mark_failed(document_id, &e.to_string()).await {
                    tracing::error!(
                        document_id,
                        error = %format!("{:#}", store_err),
                        "could not mark document failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        document_id: &str,
        created_at: DateTime<Utc>,
        bytes: Vec<u8>,
        media_type: &str,
    ) -> Result<usize> {
        let extract_config = self.config.extract.clone();
        let media = media_type.to_string();
        let extracted = tokio::task::spawn_blocking(move || extract(&bytes, &media, &extract_config))
            .await
            .map_err(|e| RagError::CorruptInput(format!("extraction task failed: {}", e)))??;

        let status = DocumentStatus::Pending.transition(DocumentStatus::Extracted)?;
        self.store
            .update_status(document_id, status)
            .await
            .map_err(RagError::Storage)?;
        tracing::debug!(document_id, pages = extracted.page_count(), "text extracted");

        let cleaning = self.config.cleaning.clone();
        let chunker = self.chunker.clone();
        let doc_id = document_id.to_string();
        let mut chunks = tokio::task::spawn_blocking(move || {
            let cleaned = clean_text(&extracted.joined(), &cleaning);
            if cleaned.is_empty() {
                return Err(RagError::EmptyDocument);
            }
            chunker.chunk_document(&doc_id, &cleaned)
        })
        .await
        .map_err(|e| RagError::CorruptInput(format!("chunking task failed: {}", e)))??;

        if chunks.is_empty() {
            return Err(RagError::EmptyDocument);
        }

        if let Some(embedder) = &self.embedder {
            self.attach_embeddings(embedder.as_ref(), document_id, &mut chunks)
                .await;
        }

        self.store
            .replace_chunks(document_id, &chunks)
            .await
            .map_err(RagError::Storage)?;

        let count = chunks.len();
        self.index.add(document_id, created_at, chunks);

        // A conversation delete does not guard documents created after it
        // listed them; withdraw the entries if the rows are already gone.
        if self.document(document_id).await?.is_none() {
            self.index.remove(document_id);
            return Err(RagError::DocumentNotFound(document_id.to_string()));
        }
        Ok(count)
    }

    async fn attach_embeddings(&self, embedder: &dyn Embedder, document_id: &str, chunks: &mut [Chunk]) {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match embed_all(embedder, &texts, self.config.embedding.batch_size).await {
            Ok(vectors) => {
                for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                    chunk.embedding = Some(vector);
                }
            }
            Err(e) => {
                let err = RagError::Embedding(format!("{:#}", e));
                tracing::warn!(
                    document_id,
                    model = embedder.model_name(),
                    error = %err,
                    "storing chunks without embeddings"
                );
            }
        }
    }

    /// Ranked chunks for a query, within `budget`.
    pub async fn retrieve(
        &self,
        scope: &Scope,
        query_text: &str,
        budget: &RetrievalBudget,
    ) -> Result<Vec<RetrievedChunk>> {
        self.retriever.retrieve(scope, query_text, budget).await
    }

    /// Build the prompt for the next assistant turn.
    ///
    /// In `open` mode, or when the scope yields no chunks, the result is a
    /// plain prompt with no context and `used_chunk_ids` is empty.
    pub async fn answer_context(
        &self,
        mode: ConversationMode,
        scope: &Scope,
        query_text: &str,
        history: &[Turn],
        budget: &RetrievalBudget,
    ) -> Result<AnswerContext> {
        let chunks = match mode {
            ConversationMode::Rag if !scope.is_empty() => {
                self.retriever.retrieve(scope, query_text, budget).await?
            }
            _ => Vec::new(),
        };
        if mode == ConversationMode::Rag && chunks.is_empty() {
            tracing::debug!("no context found; falling back to open chat prompt");
        }

        let prompt = self.prompt_builder.build(
            query_text,
            &chunks,
            history,
            self.config.prompt.max_prompt_length,
        )?;
        Ok(AnswerContext {
            used_chunk_ids: prompt.used_chunk_ids.clone(),
            prompt,
        })
    }

    /// Delete a document, its chunks and its index entries.
    /// Returns `false` if the document did not exist.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let _guard = self.in_flight.acquire(document_id)?;
        let deleted = self
            .store
            .delete_document(document_id)
            .await
            .map_err(RagError::Storage)?;
        self.index.remove(document_id);
        tracing::info!(document_id, deleted, "document deleted");
        Ok(deleted)
    }

    /// Delete every document of a conversation with chunks and index
    /// entries. Returns the deleted document ids.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<String>> {
        let docs = self.documents(conversation_id).await?;
        let _guards = docs
            .iter()
            .map(|d| self.in_flight.acquire(&d.id))
            .collect::<Result<Vec<_>>>()?;

        let deleted = self
            .store
            .delete_conversation(conversation_id)
            .await
            .map_err(RagError::Storage)?;
        for id in &deleted {
            self.index.remove(id);
        }
        tracing::info!(conversation_id, documents = deleted.len(), "conversation deleted");
        Ok(deleted)
    }

    /// Reload the index from stored chunk rows. Returns the number of
    /// documents indexed.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let docs = self
            .store
            .list_chunked_documents()
            .await
            .map_err(RagError::Storage)?;
        self.index.clear();
        for doc in &docs {
            let chunks = self.chunks(&doc.id).await?;
            self.index.add(&doc.id, doc.created_at, chunks);
        }
        tracing::debug!(documents = docs.len(), chunks = self.index.len(), "index rebuilt");
        Ok(docs.len())
    }
}
