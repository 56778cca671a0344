//! `docrag ingest` and `docrag chunk`.
//!
//! `ingest` records an upload and runs the full pipeline against the
//! configured database. `chunk` runs extraction, cleaning and chunking
//! only and prints the chunk layout without writing anything.

use std::path::Path;

use anyhow::{Context, Result};

use crate::chunk::Chunker;
use crate::clean::clean_text;
use crate::config::Config;
use crate::extract::{extract, media_type_for_filename, normalize_media_type};
use crate::pipeline::RagPipeline;

/// Media type from `--media-type`, or guessed from the file extension.
pub fn resolve_media_type(path: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(mt) = explicit {
        return Ok(normalize_media_type(mt));
    }
    let filename = file_name(path);
    media_type_for_filename(&filename)
        .map(str::to_string)
        .with_context(|| {
            format!(
                "cannot infer media type of '{}'; pass --media-type",
                filename
            )
        })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    conversation_id: &str,
    media_type: Option<&str>,
) -> Result<()> {
    let media_type = resolve_media_type(path, media_type)?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let pipeline = RagPipeline::open(config.clone()).await?;
    let doc = pipeline
        .create_document(conversation_id, &file_name(path), &media_type)
        .await?;

    println!("ingest {}", path.display());
    println!("  document: {}", doc.id);
    println!("  conversation: {}", conversation_id);
    println!("  media type: {}", media_type);

    match pipeline.ingest(&doc.id, bytes, &media_type).await {
        Ok(result) => {
            println!("  status: {}", result.status);
            println!("  chunks: {}", result.chunk_count);
            println!("ok");
            Ok(())
        }
        Err(e) => {
            println!("  status: failed");
            Err(e).with_context(|| format!("Failed to ingest {}", path.display()))
        }
    }
}

/// Print the chunks a file would produce with the current settings.
pub fn run_chunk_preview(config: &Config, path: &Path, media_type: Option<&str>) -> Result<()> {
    let media_type = resolve_media_type(path, media_type)?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let extracted = extract(&bytes, &media_type, &config.extract)?;
    let cleaned = clean_text(&extracted.joined(), &config.cleaning);
    let chunker = Chunker::new(config.chunking.clone())?;
    let spans: Vec<_> = chunker.spans(&cleaned)?.collect();

    println!("chunk {} (dry-run)", path.display());
    println!("  pages: {}", extracted.page_count());
    println!("  characters: {}", cleaned.chars().count());
    println!("  chunks: {}", spans.len());
    println!();
    for span in &spans {
        let excerpt: String = span.text.chars().take(80).collect();
        println!(
            "[{}] {}..{} ({} chars)",
            span.ordinal,
            span.start,
            span.end,
            span.end - span.start
        );
        println!("    \"{}\"", excerpt.replace('\n', " ").trim());
    }
    Ok(())
}
