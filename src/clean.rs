//! Text normalization between extraction and chunking.
//!
//! [`clean_text`] is pure and idempotent. It normalizes whitespace and
//! line endings, strips control characters and encoding artifacts, drops
//! lines repeated across many pages (running headers, footers, page
//! stamps), and reflows the result into paragraphs separated by exactly
//! one blank line.

use std::collections::{HashMap, HashSet};

use crate::config::CleaningConfig;
use crate::extract::PAGE_BREAK;

/// Characters that are never meaningful text: BOM, zero-width marks,
/// soft hyphen and the Unicode replacement character.
fn is_artifact(c: char) -> bool {
    matches!(
        c,
        '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{00AD}' | '\u{FFFD}'
    )
}

/// Normalize one line: drop artifacts and control characters, fold all
/// whitespace to single spaces, trim.
fn clean_line(line: &str) -> String {
    let filtered: String = line
        .chars()
        .filter_map(|c| {
            if is_artifact(c) {
                None
            } else if c.is_whitespace() {
                Some(' ')
            } else if c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lines present on at least `min_pages` distinct pages.
fn find_boilerplate(pages: &[Vec<String>], min_pages: usize) -> HashSet<String> {
    if min_pages < 2 || pages.len() < min_pages {
        return HashSet::new();
    }
    let mut page_counts: HashMap<&str, usize> = HashMap::new();
    for page in pages {
        let distinct: HashSet<&str> = page
            .iter()
            .map(String::as_str)
            .filter(|l| !l.is_empty())
            .collect();
        for line in distinct {
            *page_counts.entry(line).or_insert(0) += 1;
        }
    }
    page_counts
        .into_iter()
        .filter(|(_, n)| *n >= min_pages)
        .map(|(line, _)| line.to_string())
        .collect()
}

/// Join runs of non-empty lines into single-line paragraphs.
fn paragraphs<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in lines {
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

/// Clean extracted text for chunking.
///
/// Page boundaries are taken from [`PAGE_BREAK`] markers. Returns an empty
/// string when nothing but whitespace and boilerplate remains.
pub fn clean_text(raw: &str, config: &CleaningConfig) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

    let pages: Vec<Vec<String>> = normalized
        .split(PAGE_BREAK)
        .map(|page| page.split('\n').map(clean_line).collect())
        .collect();

    let boilerplate = find_boilerplate(&pages, config.boilerplate_min_pages);

    let rendered: Vec<String> = pages
        .iter()
        .map(|lines| {
            let kept = lines.iter().map(|line| {
                if boilerplate.contains(line) {
                    ""
                } else {
                    line.as_str()
                }
            });
            paragraphs(kept).join("\n\n")
        })
        .filter(|page| !page.is_empty())
        .collect();

    let separator = if config.page_breaks_as_paragraphs {
        "\n\n"
    } else {
        " "
    };
    rendered.join(separator)
}
