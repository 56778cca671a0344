//! Bounded-length prompt assembly.
//!
//! Layout (sections separated by a blank line, empty sections omitted):
//!
//! ```text
//! <preamble>
//!
//! CONTEXT:
//! [1] <top-ranked chunk>
//! ---
//! [2] <next chunk>
//!
//! CONVERSATION:
//! user: <oldest kept turn>
//! assistant: <...>
//!
//! QUESTION:
//! <query>
//! ```
//!
//! Without chunks the open-chat preamble is used and no context section
//! is emitted. When the text exceeds the budget, history turns are dropped
//! oldest first, then chunks lowest-ranked first. The query is never cut.

use serde::Serialize;

use crate::config::PromptConfig;
use crate::error::{RagError, Result};
use crate::models::{Role, Turn};
use crate::retrieve::RetrievedChunk;

const CHUNK_DELIMITER: &str = "\n---\n";

/// One chat message for chat-style completion APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// An assembled prompt and what went into it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    /// Flat rendering, never longer than the requested budget.
    pub text: String,
    pub messages: Vec<PromptMessage>,
    /// Chunks included in the prompt, in rank order.
    pub used_chunk_ids: Vec<String>,
    /// History turns dropped to fit the budget.
    pub dropped_turns: usize,
    /// Chunks dropped to fit the budget.
    pub dropped_chunks: usize,
}

impl Prompt {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_grounded(&self) -> bool {
        !self.used_chunk_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Assemble a prompt of at most `max_prompt_length` characters.
    ///
    /// `chunks` must be in rank order and `history` oldest first. Only the
    /// last `history_window` turns are considered.
    pub fn build(
        &self,
        query_text: &str,
        chunks: &[RetrievedChunk],
        history: &[Turn],
        max_prompt_length: usize,
    ) -> Result<Prompt> {
        let required = self.render(query_text, &[], &[]).chars().count();
        if required > max_prompt_length {
            return Err(RagError::BudgetTooSmall {
                required,
                budget: max_prompt_length,
            });
        }

        let window_start = history.len().saturating_sub(self.config.history_window);
        let mut turns: &[Turn] = &history[window_start..];
        let mut kept: &[RetrievedChunk] = chunks;

        let text = loop {
            let text = self.render(query_text, kept, turns);
            if text.chars().count() <= max_prompt_length {
                break text;
            }
            if !turns.is_empty() {
                turns = &turns[1..];
            } else if !kept.is_empty() {
                kept = &kept[..kept.len() - 1];
            } else {
                // unreachable given the check above
                return Err(RagError::BudgetTooSmall {
                    required,
                    budget: max_prompt_length,
                });
            }
        };

        let dropped_turns = history.len() - window_start - turns.len();
        let dropped_chunks = chunks.len() - kept.len();
        if dropped_turns > 0 || dropped_chunks > 0 {
            tracing::debug!(
                dropped_turns,
                dropped_chunks,
                budget = max_prompt_length,
                "trimmed prompt to budget"
            );
        }

        Ok(Prompt {
            text,
            messages: self.messages(query_text, kept, turns),
            used_chunk_ids: kept.iter().map(|c| c.chunk_id.clone()).collect(),
            dropped_turns,
            dropped_chunks,
        })
    }

    fn preamble(&self, chunks: &[RetrievedChunk]) -> &str {
        if chunks.is_empty() {
            &self.config.open_preamble
        } else {
            &self.config.rag_preamble
        }
    }

    fn render(&self, query_text: &str, chunks: &[RetrievedChunk], turns: &[Turn]) -> String {
        let mut sections: Vec<String> = vec![self.preamble(chunks).to_string()];
        if !chunks.is_empty() {
            sections.push(context_section(chunks));
        }
        if !turns.is_empty() {
            let lines: Vec<String> = turns
                .iter()
                .map(|t| format!("{}: {}", t.role, t.content))
                .collect();
            sections.push(format!("CONVERSATION:\n{}", lines.join("\n")));
        }
        sections.push(question_section(query_text));
        sections.join("\n\n")
    }

    fn messages(
        &self,
        query_text: &str,
        chunks: &[RetrievedChunk],
        turns: &[Turn],
    ) -> Vec<PromptMessage> {
        let mut messages = vec![PromptMessage {
            role: Role::System,
            content: self.preamble(chunks).to_string(),
        }];
        if !chunks.is_empty() {
            messages.push(PromptMessage {
                role: Role::Assistant,
                content: context_section(chunks),
            });
        }
        messages.extend(turns.iter().map(|t| PromptMessage {
            role: t.role,
            content: t.content.clone(),
        }));
        messages.push(PromptMessage {
            role: Role::User,
            content: question_section(query_text),
        });
        messages
    }
}

fn context_section(chunks: &[RetrievedChunk]) -> String {
    let body: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c.text.trim()))
        .collect();
    format!("CONTEXT:\n{}", body.join(CHUNK_DELIMITER))
}

fn question_section(query_text: &str) -> String {
    format!("QUESTION:\n{}", query_text)
}
