//! # docrag CLI
//!
//! The `docrag` binary ingests documents into a conversation and builds
//! retrieval-augmented prompts from them.
//!
//! ## Usage
//!
//! ```bash
//! docrag --config ./config/docrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag init` | Create the SQLite database and run schema migrations |
//! | `docrag ingest <file>` | Extract, chunk and index a document |
//! | `docrag status <id>` | Show a document's ingestion status |
//! | `docrag chunks <id>` | Print a document's chunks |
//! | `docrag documents` | List a conversation's documents |
//! | `docrag query "<text>"` | Retrieve context and print the prompt |
//! | `docrag chunk <file>` | Preview chunking without writing anything |
//! | `docrag delete-document <id>` | Delete a document and its chunks |
//! | `docrag delete-conversation` | Delete every document of a conversation |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use docrag::query::QueryOptions;
use docrag::{config, db, documents, ingest, logging, migrate, query};

/// docrag: document ingestion and retrieval-augmented prompt assembly.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docrag",
    about = "Document ingestion and retrieval-augmented prompt assembly",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    /// Log pipeline progress to stderr (same as RUST_LOG=debug).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a file into a conversation.
    ///
    /// Extracts text, cleans it, splits it into overlapping chunks,
    /// optionally embeds them and stores everything in SQLite. On failure
    /// the document is kept with status `failed` and the error message.
    Ingest {
        /// File to ingest.
        file: PathBuf,

        /// Conversation the document belongs to.
        #[arg(long)]
        conversation: String,

        /// Media type, overriding detection from the file extension.
        #[arg(long)]
        media_type: Option<String>,
    },

    /// Show a document's status, chunk count and error.
    Status {
        /// Document UUID.
        id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print a document's chunks in order.
    Chunks {
        /// Document UUID.
        id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List the documents of a conversation in upload order.
    Documents {
        #[arg(long)]
        conversation: String,
    },

    /// Retrieve context for a question and print the assembled prompt.
    Query {
        /// The question.
        query: String,

        #[arg(long)]
        conversation: String,

        /// `rag` answers from the conversation's documents, `open` skips
        /// retrieval.
        #[arg(long, default_value = "rag")]
        mode: String,

        /// Maximum number of chunks to include.
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Maximum combined characters of included chunks.
        #[arg(long)]
        max_chars: Option<usize>,

        /// JSON file holding prior turns, oldest first.
        #[arg(long)]
        history: Option<PathBuf>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show how a file would be chunked, without touching the database.
    Chunk {
        file: PathBuf,

        #[arg(long)]
        media_type: Option<String>,
    },

    /// Delete a document with its chunks.
    DeleteDocument {
        /// Document UUID.
        id: String,
    },

    /// Delete every document of a conversation.
    DeleteConversation {
        #[arg(long)]
        conversation: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            conversation,
            media_type,
        } => {
            ingest::run_ingest(&cfg, &file, &conversation, media_type.as_deref()).await?;
        }
        Commands::Status { id, json } => {
            documents::run_status(&cfg, &id, json).await?;
        }
        Commands::Chunks { id, json } => {
            documents::run_chunks(&cfg, &id, json).await?;
        }
        Commands::Documents { conversation } => {
            documents::run_documents(&cfg, &conversation).await?;
        }
        Commands::Query {
            query,
            conversation,
            mode,
            max_chunks,
            max_chars,
            history,
            json,
        } => {
            query::run_query(
                &cfg,
                QueryOptions {
                    query: &query,
                    conversation_id: &conversation,
                    mode: &mode,
                    max_chunks,
                    max_chars,
                    history: history.as_deref(),
                    json,
                },
            )
            .await?;
        }
        Commands::Chunk { file, media_type } => {
            ingest::run_chunk_preview(&cfg, &file, media_type.as_deref())?;
        }
        Commands::DeleteDocument { id } => {
            documents::run_delete_document(&cfg, &id).await?;
        }
        Commands::DeleteConversation { conversation } => {
            documents::run_delete_conversation(&cfg, &conversation).await?;
        }
    }

    Ok(())
}
