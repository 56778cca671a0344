//! `docrag query`: retrieve context for a conversation and print the
//! assembled prompt.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::models::{ConversationMode, RetrievalBudget, Turn};
use crate::pipeline::RagPipeline;

/// Options for one `docrag query` invocation.
#[derive(Debug, Clone)]
pub struct QueryOptions<'a> {
    pub query: &'a str,
    pub conversation_id: &'a str,
    pub mode: &'a str,
    pub max_chunks: Option<usize>,
    pub max_chars: Option<usize>,
    /// JSON file with an array of `{"role": ..., "content": ...}` turns.
    pub history: Option<&'a Path>,
    pub json: bool,
}

fn load_history(path: &Path) -> Result<Vec<Turn>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))
}

pub async fn run_query(config: &Config, opts: QueryOptions<'_>) -> Result<()> {
    let mode: ConversationMode = opts.mode.parse()?;
    let history = match opts.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };

    let pipeline = RagPipeline::open(config.clone()).await?;
    let defaults = pipeline.default_budget();
    let budget = RetrievalBudget::new(
        opts.max_chunks.unwrap_or(defaults.max_chunks),
        opts.max_chars.unwrap_or(defaults.max_chars),
    );
    let scope = pipeline.scope_for_conversation(opts.conversation_id).await?;

    let answer = pipeline
        .answer_context(mode, &scope, opts.query, &history, &budget)
        .await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    if answer.used_chunk_ids.is_empty() {
        println!("No context.");
    } else {
        println!("--- Context ({}) ---", answer.used_chunk_ids.len());
        for id in &answer.used_chunk_ids {
            println!("  {}", id);
        }
    }
    if answer.prompt.dropped_turns > 0 || answer.prompt.dropped_chunks > 0 {
        println!(
            "  trimmed: {} turn(s), {} chunk(s)",
            answer.prompt.dropped_turns, answer.prompt.dropped_chunks
        );
    }
    println!();
    println!("--- Prompt ({} chars) ---", answer.prompt.char_len());
    println!("{}", answer.prompt.text);
    Ok(())
}
