//! Error taxonomy for the ingestion and query pipeline.
//!
//! Extraction, cleaning, chunking, retrieval and prompt assembly return
//! [`RagError`]. Application glue (CLI, config file loading, database
//! setup) stays on `anyhow` and wraps these where needed.
//!
//! Query-path emptiness (empty scope, empty index) is never an error:
//! it is signaled by empty results so callers can fall back to open chat.

use thiserror::Error;

use crate::models::DocumentStatus;

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The declared media type cannot be parsed by any extractor.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Parsing failed partway through. Partial text is discarded.
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// Input exceeds a configured size limit.
    #[error("input too large: {actual} {unit} exceeds limit of {limit}")]
    InputTooLarge {
        actual: usize,
        limit: usize,
        unit: &'static str,
    },

    /// Extraction succeeded but produced no usable text.
    #[error("no text found in document")]
    EmptyDocument,

    /// Chunker or prompt budgets are inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The preamble plus the query alone do not fit the prompt budget.
    #[error("prompt budget too small: need at least {required} characters, budget is {budget}")]
    BudgetTooSmall { required: usize, budget: usize },

    /// Another ingestion (or delete) holds this document.
    #[error("ingestion already in progress for document {0}")]
    IngestionInProgress(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl RagError {
    /// True for errors produced while turning bytes into chunks.
    ///
    /// These mark the document `failed`; everything else is surfaced
    /// without touching the stored status.
    pub fn is_ingestion_failure(&self) -> bool {
        matches!(
            self,
            RagError::UnsupportedFormat(_)
                | RagError::CorruptInput(_)
                | RagError::InputTooLarge { .. }
                | RagError::EmptyDocument
                | RagError::Configuration(_)
                | RagError::Storage(_)
        )
    }
}
