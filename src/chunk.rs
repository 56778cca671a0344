//! Boundary-aware overlapping text chunker.
//!
//! Splits cleaned document text into windows of at most `chunk_size`
//! characters. Before cutting a window the chunker searches backward
//! through the last `tolerance × chunk_size` characters for a sentence end
//! or paragraph break and cuts there; otherwise it cuts at the window
//! edge. Consecutive chunks share up to `overlap` characters.
//!
//! All offsets are **character** offsets into the cleaned text, so spans
//! stay valid regardless of the UTF-8 width of the content.
//!
//! Chunking is lazy ([`ChunkSpans`] is an iterator) and restartable:
//! [`Chunker::resume_after`] continues from a stored chunk's offsets and
//! yields exactly the spans a full run would have produced after it.
//!
//! Each materialized [`Chunk`] receives a random UUID and a SHA-256 hash
//! of its text for staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{BoundaryPreference, ChunkingConfig};
use crate::error::{RagError, Result};
use crate::models::Chunk;

/// One chunk boundary produced by [`ChunkSpans`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan<'a> {
    pub ordinal: usize,
    /// Inclusive start, in characters.
    pub start: usize,
    /// Exclusive end, in characters.
    pub end: usize,
    pub text: &'a str,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Build a chunker, rejecting configurations that cannot make progress.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if config.overlap >= config.chunk_size {
            return Err(RagError::Configuration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                config.overlap, config.chunk_size
            )));
        }
        if !(0.0..1.0).contains(&config.tolerance) {
            return Err(RagError::Configuration(format!(
                "tolerance must be in [0.0, 1.0), got {}",
                config.tolerance
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Lazily split `text` into spans, starting at ordinal 0.
    pub fn spans<'a>(&self, text: &'a str) -> Result<ChunkSpans<'a>> {
        let mut spans = ChunkSpans::prepare(text, &self.config)?;
        if !spans.is_empty() {
            spans.next_start = Some(0);
        }
        Ok(spans)
    }

    /// Continue chunking after a previously produced span.
    ///
    /// `ordinal`, `start` and `end` are the stored offsets of the last
    /// chunk already persisted. Returns an exhausted iterator when that
    /// chunk reached the end of the text.
    pub fn resume_after<'a>(
        &self,
        text: &'a str,
        ordinal: usize,
        start: usize,
        end: usize,
    ) -> Result<ChunkSpans<'a>> {
        let mut spans = ChunkSpans::prepare(text, &self.config)?;
        if start >= end || end > spans.len() {
            return Err(RagError::Configuration(format!(
                "cannot resume from span {}..{} of a {}-character text",
                start,
                end,
                spans.len()
            )));
        }
        spans.next_ordinal = ordinal + 1;
        spans.prev_cut = Some(end);
        if end < spans.len() {
            spans.next_start = Some(spans.next_window_start(start, end));
        }
        Ok(spans)
    }

    /// Materialize every span of `text` into [`Chunk`] records.
    pub fn chunk_document(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .spans(text)?
            .map(|span| make_chunk(document_id, &span))
            .collect())
    }
}

/// Lazy, finite iterator over the chunk spans of one text.
#[derive(Debug, Clone)]
pub struct ChunkSpans<'a> {
    text: &'a str,
    chars: Vec<char>,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    byte_offsets: Vec<usize>,
    chunk_size: usize,
    overlap: usize,
    tolerance_chars: usize,
    boundary: BoundaryPreference,
    next_ordinal: usize,
    next_start: Option<usize>,
    prev_cut: Option<usize>,
}

impl<'a> ChunkSpans<'a> {
    fn prepare(text: &'a str, config: &ChunkingConfig) -> Result<Self> {
        let mut chars = Vec::new();
        let mut byte_offsets = Vec::new();
        for (i, c) in text.char_indices() {
            byte_offsets.push(i);
            chars.push(c);
        }
        byte_offsets.push(text.len());

        if chars.len() > config.max_input_chars {
            return Err(RagError::InputTooLarge {
                actual: chars.len(),
                limit: config.max_input_chars,
                unit: "characters",
            });
        }

        let tolerance_chars = (config.chunk_size as f64 * config.tolerance).ceil() as usize;
        Ok(Self {
            text,
            chars,
            byte_offsets,
            chunk_size: config.chunk_size.max(1),
            overlap: config.overlap,
            tolerance_chars,
            boundary: config.boundary,
            next_ordinal: 0,
            next_start: None,
            prev_cut: None,
        })
    }

    /// Length of the text in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    fn is_sentence_end(&self, cut: usize) -> bool {
        cut > 0
            && cut < self.chars.len()
            && matches!(self.chars[cut - 1], '.' | '!' | '?')
            && self.chars[cut].is_whitespace()
    }

    fn is_paragraph_break(&self, cut: usize) -> bool {
        cut + 1 < self.chars.len() && self.chars[cut] == '\n' && self.chars[cut + 1] == '\n'
    }

    /// Nearest boundary at or before `window_end`, not before `lo`.
    fn find_boundary(&self, lo: usize, window_end: usize) -> Option<usize> {
        if lo > window_end {
            return None;
        }
        let scan = |pred: &dyn Fn(usize) -> bool| (lo..=window_end).rev().find(|&c| pred(c));
        match self.boundary {
            BoundaryPreference::None => None,
            BoundaryPreference::Sentence => {
                scan(&|c| self.is_sentence_end(c) || self.is_paragraph_break(c))
            }
            BoundaryPreference::Paragraph => scan(&|c| self.is_paragraph_break(c))
                .or_else(|| scan(&|c| self.is_sentence_end(c))),
        }
    }

    fn cut_for(&self, start: usize) -> usize {
        let n = self.chars.len();
        let window_end = (start + self.chunk_size).min(n);
        if window_end == n {
            return n;
        }
        let lo = window_end
            .saturating_sub(self.tolerance_chars)
            .max(start + 1)
            .max(self.prev_cut.map_or(0, |p| p + 1));
        self.find_boundary(lo, window_end).unwrap_or(window_end)
    }

    /// Start of the window following the span `start..cut`.
    ///
    /// Backs off `overlap` characters from the cut, then moves forward to
    /// the next word start inside the overlap. Always strictly after
    /// `start` and never after `cut`.
    fn next_window_start(&self, start: usize, cut: usize) -> usize {
        let mut next = cut.saturating_sub(self.overlap);
        if next > 0 && next < cut && !self.chars[next - 1].is_whitespace() {
            if let Some(ws) = (next..cut).find(|&i| self.chars[i].is_whitespace()) {
                next = ws + 1;
            }
        }
        next.max(start + 1).min(cut)
    }
}

impl<'a> Iterator for ChunkSpans<'a> {
    type Item = ChunkSpan<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let cut = self.cut_for(start);

        let span = ChunkSpan {
            ordinal: self.next_ordinal,
            start,
            end: cut,
            text: &self.text[self.byte_offsets[start]..self.byte_offsets[cut]],
        };

        self.next_ordinal += 1;
        self.prev_cut = Some(cut);
        self.next_start = if cut >= self.chars.len() {
            None
        } else {
            Some(self.next_window_start(start, cut))
        };
        Some(span)
    }
}

fn make_chunk(document_id: &str, span: &ChunkSpan<'_>) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(span.text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        ordinal: span.ordinal,
        text: span.text.to_string(),
        char_start: span.start,
        char_end: span.end,
        hash,
        embedding: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize, boundary: BoundaryPreference) -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size,
            overlap,
            boundary,
            ..ChunkingConfig::default()
        })
        .unwrap()
    }

    /// Filler of lowercase words with no sentence punctuation.
    fn filler(len: usize) -> String {
        let word = "lorem ";
        word.repeat(len / word.len() + 1)[..len].to_string()
    }

    /// A `len`-char text whose sentence ends sit at the given char offsets
    /// (the period is the character just before each offset).
    fn text_with_breaks(len: usize, breaks: &[usize]) -> String {
        let mut chars: Vec<char> = filler(len).chars().collect();
        for &b in breaks {
            chars[b - 1] = '.';
            chars[b] = ' ';
        }
        chars.into_iter().collect()
    }

    fn assert_invariants(text: &str, spans: &[ChunkSpan<'_>], overlap: usize) {
        let n = text.chars().count();
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, n);
        for (i, s) in spans.iter().enumerate() {
            assert_eq!(s.ordinal, i);
            assert!(s.start < s.end);
        }
        for pair in spans.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(b.start > a.start, "start regressed: {:?} -> {:?}", a, b);
            assert!(b.end > a.end);
            assert!(b.start <= a.end, "gap between {:?} and {:?}", a, b);
            assert!(a.end - b.start <= overlap, "overlap too large");
        }
        // The covered ranges reconstruct the text.
        let mut rebuilt = spans[0].text.to_string();
        for pair in spans.windows(2) {
            let skip = pair[0].end - pair[1].start;
            rebuilt.extend(pair[1].text.chars().skip(skip));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let err = Chunker::new(ChunkingConfig {
            chunk_size: 100,
            overlap: 100,
            ..ChunkingConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));

        assert!(Chunker::new(ChunkingConfig {
            chunk_size: 0,
            overlap: 0,
            ..ChunkingConfig::default()
        })
        .is_err());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let c = chunker(800, 200, BoundaryPreference::Sentence);
        let spans: Vec<_> = c.spans("Hello, world!").unwrap().collect();
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (0, 13));
        assert_eq!(spans[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_has_no_chunks() {
        let c = chunker(800, 200, BoundaryPreference::Sentence);
        assert_eq!(c.spans("").unwrap().count(), 0);
        assert!(c.chunk_document("doc1", "").unwrap().is_empty());
    }

    #[test]
    fn cuts_at_sentence_ends_inside_tolerance() {
        let text = text_with_breaks(1200, &[480, 510, 960]);
        let c = chunker(500, 50, BoundaryPreference::Sentence);
        let spans: Vec<_> = c.spans(&text).unwrap().collect();

        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].end, 480);
        assert!(spans[0].text.ends_with('.'));
        let tolerance = 75;
        assert!(spans[1].end.abs_diff(960) <= tolerance, "second cut {}", spans[1].end);
        assert_ne!(spans[1].end, 1000);
        assert_invariants(&text, &spans, 50);
    }

    #[test]
    fn hard_cut_without_boundaries() {
        let text = filler(1000);
        let c = chunker(300, 0, BoundaryPreference::Sentence);
        let spans: Vec<_> = c.spans(&text).unwrap().collect();
        assert_eq!(spans[0].end, 300);
        assert_invariants(&text, &spans, 0);
    }

    #[test]
    fn boundary_none_ignores_punctuation() {
        let text = text_with_breaks(600, &[280]);
        let c = chunker(300, 0, BoundaryPreference::None);
        let spans: Vec<_> = c.spans(&text).unwrap().collect();
        assert_eq!(spans[0].end, 300);
    }

    #[test]
    fn paragraph_preference_beats_nearer_sentence_end() {
        let mut chars: Vec<char> = filler(400).chars().collect();
        // paragraph break at 260, sentence end at 290
        chars[259] = '.';
        chars[260] = '\n';
        chars[261] = '\n';
        chars[289] = '.';
        chars[290] = ' ';
        let text: String = chars.into_iter().collect();

        let para = chunker(300, 0, BoundaryPreference::Paragraph);
        assert_eq!(para.spans(&text).unwrap().next().unwrap().end, 260);

        let sentence = chunker(300, 0, BoundaryPreference::Sentence);
        assert_eq!(sentence.spans(&text).unwrap().next().unwrap().end, 290);
    }

    #[test]
    fn overlap_starts_on_a_word() {
        let text = filler(2000);
        let c = chunker(200, 40, BoundaryPreference::Sentence);
        let spans: Vec<_> = c.spans(&text).unwrap().collect();
        for s in &spans[1..] {
            assert!(s.text.starts_with("lorem"), "span text {:?}", s.text);
        }
        assert_invariants(&text, &spans, 40);
    }

    #[test]
    fn invariants_hold_across_configs() {
        let text = "Alpha beta gamma. Delta epsilon!\n\nZeta eta theta? Iota kappa lambda mu. "
            .repeat(40);
        for (size, overlap) in [(50, 0), (50, 49), (120, 30), (7, 6), (1, 0), (997, 100)] {
            for boundary in [
                BoundaryPreference::None,
                BoundaryPreference::Sentence,
                BoundaryPreference::Paragraph,
            ] {
                let c = chunker(size, overlap, boundary);
                let spans: Vec<_> = c.spans(&text).unwrap().collect();
                assert_invariants(&text, &spans, overlap);
            }
        }
    }

    #[test]
    fn offsets_are_characters_not_bytes() {
        let text = "héllo wörld. ".repeat(30);
        let c = chunker(40, 10, BoundaryPreference::Sentence);
        let spans: Vec<_> = c.spans(&text).unwrap().collect();
        for s in &spans {
            assert_eq!(s.text.chars().count(), s.end - s.start);
            assert!(s.end - s.start <= 40);
        }
        assert_invariants(&text, &spans, 10);
    }

    #[test]
    fn resume_matches_full_run() {
        let text = text_with_breaks(3000, &[480, 510, 960, 1400, 1420, 2100, 2650]);
        let c = chunker(500, 120, BoundaryPreference::Sentence);
        let full: Vec<_> = c.spans(&text).unwrap().collect();
        assert!(full.len() > 3);

        let stored = full[2];
        let resumed: Vec<_> = c
            .resume_after(&text, stored.ordinal, stored.start, stored.end)
            .unwrap()
            .collect();
        assert_eq!(resumed, full[3..].to_vec());

        let last = full.last().unwrap();
        assert_eq!(
            c.resume_after(&text, last.ordinal, last.start, last.end)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn input_limit_is_enforced() {
        let c = Chunker::new(ChunkingConfig {
            max_input_chars: 100,
            ..ChunkingConfig::default()
        })
        .unwrap();
        let err = c.spans(&filler(101)).unwrap_err();
        assert!(matches!(err, RagError::InputTooLarge { actual: 101, .. }));
    }

    #[test]
    fn chunk_document_fills_records() {
        let text = text_with_breaks(1200, &[480, 960]);
        let c = chunker(500, 50, BoundaryPreference::Sentence);
        let chunks = c.chunk_document("doc1", &text).unwrap();
        for (i, ch) in chunks.iter().enumerate() {
            assert_eq!(ch.ordinal, i);
            assert_eq!(ch.document_id, "doc1");
            assert_eq!(ch.hash.len(), 64);
            assert_eq!(ch.text.chars().count(), ch.char_len());
            assert!(ch.embedding.is_none());
        }
        // Same text, same hashes.
        let again = c.chunk_document("doc1", &text).unwrap();
        let hashes: Vec<_> = chunks.iter().map(|c| &c.hash).collect();
        let hashes_again: Vec<_> = again.iter().map(|c| &c.hash).collect();
        assert_eq!(hashes, hashes_again);
    }
}
