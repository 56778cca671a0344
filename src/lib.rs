//! # docrag
//!
//! Document ingestion and retrieval-augmented prompt assembly.
//!
//! Uploaded files (PDF, DOCX, PPTX, XLSX, plain text) are extracted,
//! cleaned and split into overlapping chunks that are stored in SQLite
//! and kept in an in-memory index. At query time the best chunks for the
//! current conversation are retrieved under a size budget and assembled
//! into a bounded-length prompt for a downstream language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌─────────┐   ┌──────────┐
//! │ Extract  │──▶│ Clean │──▶│  Chunk  │──▶│  SQLite  │
//! │ PDF/OOXML│   └───────┘   └─────────┘   └────┬─────┘
//! └──────────┘                                  │ rebuild
//!                                               ▼
//!                ┌────────┐   ┌──────────┐   ┌───────┐
//!     query ────▶│ Prompt │◀──│ Retrieve │◀──│ Index │
//!                └────────┘   └──────────┘   └───────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docrag init
//! docrag ingest ./handbook.pdf --conversation support
//! docrag query "What is the refund policy?" --conversation support --mode rag
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | Text extraction per media type |
//! | [`clean`] | Text normalization |
//! | [`chunk`] | Overlapping, boundary-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`scoring`] | Chunk relevance scorers |
//! | [`index`] | In-memory chunk index |
//! | [`retrieve`] | Budgeted retrieval |
//! | [`prompt`] | Bounded prompt assembly |
//! | [`store`] | Document store trait and in-memory store |
//! | [`sqlite_store`] | SQLite document store |
//! | [`pipeline`] | Ingestion and query orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod clean;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod query;
pub mod retrieve;
pub mod scoring;
pub mod sqlite_store;
pub mod store;
