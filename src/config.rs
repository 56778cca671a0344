//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an empty file (or only a `[db]` path)
//! is a valid configuration. [`load_config`] reads and parses the file,
//! then runs [`Config::validate`], which rejects inconsistent chunker,
//! retrieval and prompt settings with [`RagError::Configuration`].
//!
//! ```toml
//! [db]
//! path = "./data/docrag.sqlite"
//!
//! [chunking]
//! chunk_size = 800
//! overlap = 200
//! boundary = "sentence"
//!
//! [retrieval]
//! scorer = "keyword"
//! max_chunks = 3
//! max_chars = 2400
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/docrag.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    /// Pages with fewer trimmed characters are treated as noise.
    #[serde(default = "default_min_page_chars")]
    pub min_page_chars: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            min_page_chars: default_min_page_chars(),
        }
    }
}

fn default_max_input_bytes() -> usize {
    20 * 1024 * 1024
}
fn default_min_page_chars() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleaningConfig {
    /// A line found on at least this many pages is boilerplate. `0` disables.
    #[serde(default = "default_boilerplate_min_pages")]
    pub boilerplate_min_pages: usize,
    #[serde(default = "default_true")]
    pub page_breaks_as_paragraphs: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            boilerplate_min_pages: default_boilerplate_min_pages(),
            page_breaks_as_paragraphs: true,
        }
    }
}

fn default_boilerplate_min_pages() -> usize {
    3
}
fn default_true() -> bool {
    true
}

/// Where the chunker prefers to cut inside its tolerance window.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPreference {
    None,
    #[default]
    Sentence,
    Paragraph,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub boundary: BoundaryPreference,
    /// Fraction of `chunk_size` searched backward for a boundary.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            boundary: BoundaryPreference::default(),
            tolerance: default_tolerance(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    200
}
fn default_tolerance() -> f64 {
    0.15
}
fn default_max_input_chars() -> usize {
    200_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `keyword`, `semantic`, or `hybrid`.
    #[serde(default = "default_scorer")]
    pub scorer: String,
    /// Weight for semantic vs keyword: `hybrid = (1-α)*keyword + α*semantic`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Smallest chunk length used when converting a char budget into `k`.
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    /// Drop candidates scoring at or below this value.
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            scorer: default_scorer(),
            hybrid_alpha: default_hybrid_alpha(),
            max_chunks: default_max_chunks(),
            max_chars: default_max_chars(),
            min_chunk_chars: default_min_chunk_chars(),
            min_score: None,
        }
    }
}

fn default_scorer() -> String {
    "keyword".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_max_chunks() -> usize {
    3
}
fn default_max_chars() -> usize {
    2400
}
fn default_min_chunk_chars() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    /// Only the most recent turns are considered for the prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_rag_preamble")]
    pub rag_preamble: String,
    #[serde(default = "default_open_preamble")]
    pub open_preamble: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: default_max_prompt_length(),
            history_window: default_history_window(),
            rag_preamble: default_rag_preamble(),
            open_preamble: default_open_preamble(),
        }
    }
}

fn default_max_prompt_length() -> usize {
    8000
}
fn default_history_window() -> usize {
    10
}
fn default_rag_preamble() -> String {
    "You are a helpful assistant. Use the provided context to answer the user's question. \
     If the context is not enough, say so clearly."
        .to_string()
}
fn default_open_preamble() -> String {
    "You are a helpful assistant.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hashed`, or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Check cross-field consistency of chunker, retrieval, prompt and
    /// embedding settings.
    pub fn validate(&self) -> Result<(), RagError> {
        let bad = |msg: String| -> Result<(), RagError> { Err(RagError::Configuration(msg)) };

        let c = &self.chunking;
        if c.chunk_size == 0 {
            return bad("chunking.chunk_size must be > 0".into());
        }
        if c.overlap >= c.chunk_size {
            return bad(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                c.overlap, c.chunk_size
            ));
        }
        if !(0.0..1.0).contains(&c.tolerance) {
            return bad("chunking.tolerance must be in [0.0, 1.0)".into());
        }
        if c.max_input_chars == 0 {
            return bad("chunking.max_input_chars must be > 0".into());
        }

        if self.cleaning.boilerplate_min_pages == 1 {
            return bad(
                "cleaning.boilerplate_min_pages must be 0 (disabled) or >= 2; \
                 1 would treat every line as boilerplate"
                    .into(),
            );
        }

        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.hybrid_alpha) {
            return bad("retrieval.hybrid_alpha must be in [0.0, 1.0]".into());
        }
        if r.min_chunk_chars == 0 {
            return bad("retrieval.min_chunk_chars must be > 0".into());
        }
        match r.scorer.as_str() {
            "keyword" => {}
            "semantic" | "hybrid" => {
                if !self.embedding.is_enabled() {
                    return bad(format!(
                        "retrieval.scorer '{}' requires embeddings. Set [embedding] provider in config.",
                        r.scorer
                    ));
                }
            }
            other => {
                return bad(format!(
                    "Unknown retrieval.scorer: '{}'. Use keyword, semantic, or hybrid.",
                    other
                ))
            }
        }

        let p = &self.prompt;
        let floor = p.rag_preamble.chars().count().max(p.open_preamble.chars().count());
        if p.max_prompt_length <= floor {
            return bad(format!(
                "prompt.max_prompt_length ({}) leaves no room after the preamble ({} characters)",
                p.max_prompt_length, floor
            ));
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" => {}
            "hashed" | "openai" => {
                if e.dims.is_none() || e.dims == Some(0) {
                    return bad(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        e.provider
                    ));
                }
                if e.provider == "openai" && e.model.is_none() {
                    return bad("embedding.model must be specified when provider is 'openai'".into());
                }
                if e.batch_size == 0 {
                    return bad("embedding.batch_size must be > 0".into());
                }
            }
            other => {
                return bad(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, hashed, or openai.",
                    other
                ))
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
