//! Core data models used throughout docrag.
//!
//! These types represent the documents, chunks, scopes and budgets that
//! flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Ingestion state of an uploaded document.
///
/// Success path is `pending → extracted → chunked`; any stage may fail.
/// Every state may go back to `pending` when the document is ingested
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Extracted,
    Chunked,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Extracted => "extracted",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Extracted)
                | (Extracted, Chunked)
                | (Pending, Failed)
                | (Extracted, Failed)
                // re-ingestion, also after an interrupted run
                | (_, Pending)
        )
    }

    /// Validate a transition, returning the next state.
    pub fn transition(self, next: DocumentStatus) -> Result<DocumentStatus, RagError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RagError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "extracted" => Ok(DocumentStatus::Extracted),
            "chunked" => Ok(DocumentStatus::Chunked),
            "failed" => Ok(DocumentStatus::Failed),
            other => anyhow::bail!("unknown document status: '{}'", other),
        }
    }
}

/// An uploaded document and its ingestion state.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub conversation_id: String,
    pub filename: String,
    pub media_type: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    /// Failure message, set only when `status` is `failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Millisecond timestamp of the last document created in this process.
static LAST_CREATED_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Creation time, strictly increasing within the process at the
/// millisecond precision the SQLite store keeps.
fn next_created_at() -> DateTime<Utc> {
    let now = Utc::now();
    let wall = now.timestamp_millis();
    let mut last = LAST_CREATED_MILLIS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(last.saturating_add(1));
        match LAST_CREATED_MILLIS.compare_exchange_weak(
            last,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return Utc.timestamp_millis_opt(next).single().unwrap_or(now),
            Err(seen) => last = seen,
        }
    }
}

impl Document {
    /// A new `pending` document. Documents created later in the same
    /// process always get a later `created_at`.
    pub fn new(conversation_id: &str, filename: &str, media_type: &str) -> Self {
        let now = next_created_at();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            filename: filename.to_string(),
            media_type: media_type.to_string(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A bounded contiguous segment of a document's cleaned text.
///
/// `char_start..char_end` are character (not byte) offsets into the
/// cleaned text the chunk was cut from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    /// SHA-256 of `text`.
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Length of the chunk text in characters.
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// The set of documents a query is restricted to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    document_ids: Vec<String>,
}

impl Scope {
    pub fn single(document_id: impl Into<String>) -> Self {
        Self {
            document_ids: vec![document_id.into()],
        }
    }

    /// Build a scope from document ids, dropping duplicates but keeping
    /// first-seen order.
    pub fn documents<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut document_ids: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !document_ids.contains(&id) {
                document_ids.push(id);
            }
        }
        Self { document_ids }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.document_ids.iter().any(|d| d == document_id)
    }

    pub fn document_ids(&self) -> &[String] {
        &self.document_ids
    }
}

/// Result budget for a retrieval call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalBudget {
    pub max_chunks: usize,
    pub max_chars: usize,
}

impl RetrievalBudget {
    pub fn new(max_chunks: usize, max_chars: usize) -> Self {
        Self {
            max_chunks,
            max_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prior message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Whether a conversation answers from uploaded documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Open,
    Rag,
}

impl FromStr for ConversationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConversationMode::Open),
            "rag" => Ok(ConversationMode::Rag),
            other => anyhow::bail!("mode must be 'open' or 'rag', got '{}'", other),
        }
    }
}

/// Outcome of a successful `ingest` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_created_in_sequence_have_increasing_creation_times() {
        let docs: Vec<Document> = (0..50)
            .map(|i| Document::new("conv", &format!("{}.txt", i), "text/plain"))
            .collect();
        for pair in docs.windows(2) {
            assert!(
                pair[1].created_at.timestamp_millis() > pair[0].created_at.timestamp_millis()
            );
        }
        assert_eq!(docs[0].created_at, docs[0].updated_at);
    }

    #[test]
    fn status_success_path() {
        let s = DocumentStatus::Pending;
        let s = s.transition(DocumentStatus::Extracted).unwrap();
        let s = s.transition(DocumentStatus::Chunked).unwrap();
        assert_eq!(s, DocumentStatus::Chunked);
    }

    #[test]
    fn status_rejects_skipping_extraction() {
        let err = DocumentStatus::Pending
            .transition(DocumentStatus::Chunked)
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidTransition { .. }));
    }

    #[test]
    fn status_chunked_cannot_fail_directly() {
        assert!(!DocumentStatus::Chunked.can_transition_to(DocumentStatus::Failed));
        assert!(DocumentStatus::Chunked.can_transition_to(DocumentStatus::Pending));
        assert!(DocumentStatus::Failed.can_transition_to(DocumentStatus::Pending));
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Extracted,
            DocumentStatus::Chunked,
            DocumentStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<DocumentStatus>().unwrap(), s);
        }
        assert!("done".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn scope_dedupes_and_keeps_order() {
        let scope = Scope::documents(["b", "a", "b"]);
        assert_eq!(scope.document_ids(), &["b".to_string(), "a".to_string()]);
        assert!(scope.contains("a"));
        assert!(!scope.contains("c"));
        assert!(Scope::empty().is_empty());
    }

    #[test]
    fn conversation_mode_parse() {
        assert_eq!("rag".parse::<ConversationMode>().unwrap(), ConversationMode::Rag);
        assert_eq!("open".parse::<ConversationMode>().unwrap(), ConversationMode::Open);
        assert!("chat".parse::<ConversationMode>().is_err());
    }
}
