//! Document inspection and deletion commands.
//!
//! Backs `docrag status`, `docrag chunks`, `docrag documents`,
//! `docrag delete-document` and `docrag delete-conversation`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::models::Document;
use crate::pipeline::RagPipeline;

fn format_ts(doc: &Document) -> (String, String) {
    let fmt = "%Y-%m-%dT%H:%M:%SZ";
    (
        doc.created_at.format(fmt).to_string(),
        doc.updated_at.format(fmt).to_string(),
    )
}

pub async fn run_status(config: &Config, id: &str, json: bool) -> Result<()> {
    let pipeline = RagPipeline::open(config.clone()).await?;
    let Some(doc) = pipeline.document(id).await? else {
        bail!("document not found: {}", id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let (created, updated) = format_ts(&doc);
    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("conversation: {}", doc.conversation_id);
    println!("filename:     {}", doc.filename);
    println!("media_type:   {}", doc.media_type);
    println!("status:       {}", doc.status);
    if let Some(ref err) = doc.error {
        println!("error:        {}", err);
    }
    println!("chunks:       {}", doc.chunk_count);
    println!("created_at:   {}", created);
    println!("updated_at:   {}", updated);
    Ok(())
}

pub async fn run_chunks(config: &Config, id: &str, json: bool) -> Result<()> {
    let pipeline = RagPipeline::open(config.clone()).await?;
    if pipeline.document(id).await?.is_none() {
        bail!("document not found: {}", id);
    }
    let chunks = pipeline.chunks(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!(
            "[chunk {}] {}..{} {}",
            chunk.ordinal,
            chunk.char_start,
            chunk.char_end,
            if chunk.embedding.is_some() { "(embedded)" } else { "" }
        );
        println!("{}", chunk.text);
        println!();
    }
    Ok(())
}

pub async fn run_documents(config: &Config, conversation_id: &str) -> Result<()> {
    let pipeline = RagPipeline::open(config.clone()).await?;
    let docs = pipeline.documents(conversation_id).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "  {:<36}  {:<9}  {:>6}  {}",
        "ID", "STATUS", "CHUNKS", "FILENAME"
    );
    println!("  {}", "-".repeat(72));
    for doc in &docs {
        println!(
            "  {:<36}  {:<9}  {:>6}  {}",
            doc.id, doc.status, doc.chunk_count, doc.filename
        );
    }
    Ok(())
}

pub async fn run_delete_document(config: &Config, id: &str) -> Result<()> {
    let pipeline = RagPipeline::open(config.clone()).await?;
    if !pipeline.delete_document(id).await? {
        bail!("document not found: {}", id);
    }
    println!("deleted document {}", id);
    Ok(())
}

pub async fn run_delete_conversation(config: &Config, conversation_id: &str) -> Result<()> {
    let pipeline = RagPipeline::open(config.clone()).await?;
    let deleted = pipeline.delete_conversation(conversation_id).await?;
    println!(
        "deleted {} document(s) from conversation {}",
        deleted.len(),
        conversation_id
    );
    Ok(())
}
