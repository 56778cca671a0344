//! Page-aware text extraction for uploaded documents (PDF, OOXML, plain text).
//!
//! The upload handler supplies bytes plus a declared media type; this
//! module returns UTF-8 text in reading order, one entry per page.
//! Extraction is all-or-nothing: any parse failure discards whatever was
//! read so far.
//!
//! Page boundaries survive as [`PAGE_BREAK`] markers in
//! [`ExtractedText::joined`]. They carry no meaning downstream except that
//! the cleaner may turn them into paragraph breaks and uses them to find
//! repeated header/footer lines.

use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::config::ExtractConfig;
use crate::error::RagError;

/// Soft page marker (ASCII form feed) placed between extracted pages.
pub const PAGE_BREAK: char = '\u{0C}';

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Upper bound on the decompressed size of one archive part.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

/// Text of a document, one string per page in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
}

impl ExtractedText {
    /// All pages joined with [`PAGE_BREAK`].
    pub fn joined(&self) -> String {
        let mut out = String::new();
        for (i, page) in self.pages.iter().enumerate() {
            if i > 0 {
                out.push(PAGE_BREAK);
            }
            out.push_str(page);
        }
        out
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Lowercase a media type and drop parameters such as `; charset=utf-8`.
pub fn normalize_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Guess a media type from a file name extension.
pub fn media_type_for_filename(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        "xlsx" => Some(MIME_XLSX),
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Extract page-ordered text from `bytes` of the declared `media_type`.
///
/// Pages shorter than `min_page_chars` after trimming are dropped as
/// noise. Fails with [`RagError::EmptyDocument`] if nothing remains.
pub fn extract(
    bytes: &[u8],
    media_type: &str,
    config: &ExtractConfig,
) -> Result<ExtractedText, RagError> {
    let media_type = normalize_media_type(media_type);
    if bytes.len() > config.max_input_bytes {
        return Err(RagError::InputTooLarge {
            actual: bytes.len(),
            limit: config.max_input_bytes,
            unit: "bytes",
        });
    }

    let raw_pages = match media_type.as_str() {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOCX => vec![extract_docx(bytes)?],
        MIME_PPTX => extract_pptx(bytes)?,
        MIME_XLSX => extract_xlsx(bytes)?,
        MIME_TEXT | MIME_MARKDOWN => extract_plain(bytes)?,
        other => return Err(RagError::UnsupportedFormat(other.to_string())),
    };

    let pages: Vec<String> = raw_pages
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| p.chars().count() >= config.min_page_chars.max(1))
        .collect();

    if pages.is_empty() {
        return Err(RagError::EmptyDocument);
    }
    Ok(ExtractedText { pages })
}

fn extract_plain(bytes: &[u8]) -> Result<Vec<String>, RagError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RagError::CorruptInput(format!("text is not valid UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, RagError> {
    // pdf-extract can panic on malformed streams; treat that as corrupt input.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match outcome {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(RagError::CorruptInput(format!("PDF extraction failed: {}", e))),
        Err(_) => Err(RagError::CorruptInput(
            "PDF extraction failed: parser aborted".to_string(),
        )),
    }
}

fn ooxml_err(e: impl std::fmt::Display) -> RagError {
    RagError::CorruptInput(format!("OOXML extraction failed: {}", e))
}

/// An Office Open XML container (docx, pptx, xlsx are all ZIP archives of
/// XML parts).
struct OoxmlPackage<'a> {
    archive: zip::ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> OoxmlPackage<'a> {
    fn open(bytes: &'a [u8]) -> Result<Self, RagError> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml_err)?;
        Ok(Self { archive })
    }

    fn contains(&self, part: &str) -> bool {
        self.archive.file_names().any(|name| name == part)
    }

    /// Decompress one part, refusing anything over [`MAX_PART_BYTES`].
    fn read(&mut self, part: &str) -> Result<Vec<u8>, RagError> {
        let entry = self.archive.by_name(part).map_err(ooxml_err)?;
        let mut data = Vec::new();
        entry
            .take(MAX_PART_BYTES + 1)
            .read_to_end(&mut data)
            .map_err(ooxml_err)?;
        if data.len() as u64 > MAX_PART_BYTES {
            return Err(ooxml_err(format!(
                "part {} is larger than {} bytes",
                part, MAX_PART_BYTES
            )));
        }
        Ok(data)
    }

    /// Parts named `<prefix><n>.xml`, in numeric order of `n`.
    fn numbered(&self, prefix: &str) -> Vec<String> {
        let mut parts: Vec<(u32, String)> = self
            .archive
            .file_names()
            .filter_map(|name| {
                let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
                Some((n, name.to_owned()))
            })
            .collect();
        parts.sort();
        parts.into_iter().map(|(_, name)| name).collect()
    }
}

/// What [`walk_xml`] reports to its visitor. Names are local (no prefix).
enum Node<'e> {
    Open(&'e [u8], &'e BytesStart<'e>),
    Text(&'e str),
    Close(&'e [u8]),
}

/// Stream `xml` through `visit` until the end of input or until `visit`
/// returns `false`.
fn walk_xml(xml: &[u8], mut visit: impl FnMut(Node<'_>) -> bool) -> Result<(), RagError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        let more = match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(start) => {
                let name = start.local_name();
                visit(Node::Open(name.as_ref(), &start))
            }
            Event::Text(raw) => {
                let text = raw.unescape().map_err(ooxml_err)?;
                visit(Node::Text(&text))
            }
            Event::End(end) => {
                let name = end.local_name();
                visit(Node::Close(name.as_ref()))
            }
            Event::Eof => false,
            _ => true,
        };
        if !more {
            return Ok(());
        }
        buf.clear();
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, RagError> {
    let mut package = OoxmlPackage::open(bytes)?;
    docx_text(&package.read("word/document.xml")?)
}

/// `<w:t>` runs concatenated, one line per `<w:p>`.
fn docx_text(xml: &[u8]) -> Result<String, RagError> {
    let mut out = String::new();
    let mut in_run = false;
    walk_xml(xml, |node| {
        match node {
            Node::Open(b"t", _) => in_run = true,
            Node::Close(b"t") => in_run = false,
            Node::Close(b"p") => out.push('\n'),
            Node::Text(text) if in_run => out.push_str(text),
            _ => {}
        }
        true
    })?;
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<String>, RagError> {
    let mut package = OoxmlPackage::open(bytes)?;
    let slides = package.numbered("ppt/slides/slide");
    slides
        .iter()
        .map(|part| slide_text(&package.read(part)?))
        .collect()
}

fn slide_text(xml: &[u8]) -> Result<String, RagError> {
    let mut runs: Vec<String> = Vec::new();
    let mut in_run = false;
    walk_xml(xml, |node| {
        match node {
            Node::Open(b"t", _) => in_run = true,
            Node::Close(b"t") => in_run = false,
            Node::Text(text) if in_run && !text.trim().is_empty() => {
                runs.push(text.trim().to_string())
            }
            _ => {}
        }
        true
    })?;
    Ok(runs.join(" "))
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<String>, RagError> {
    let mut package = OoxmlPackage::open(bytes)?;
    let shared = shared_strings(&mut package)?;
    let sheets = package.numbered("xl/worksheets/sheet");
    sheets
        .iter()
        .take(XLSX_MAX_SHEETS)
        .map(|part| sheet_text(&package.read(part)?, &shared))
        .collect()
}

/// The workbook string table. Rich-text entries (several `<t>` runs in
/// one `<si>`) are concatenated.
fn shared_strings(package: &mut OoxmlPackage<'_>) -> Result<Vec<String>, RagError> {
    const PART: &str = "xl/sharedStrings.xml";
    if !package.contains(PART) {
        return Ok(Vec::new());
    }
    let xml = package.read(PART)?;
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_run = false;
    walk_xml(&xml, |node| {
        match node {
            Node::Open(b"si", _) => current = Some(String::new()),
            Node::Close(b"si") => strings.extend(current.take()),
            Node::Open(b"t", _) => in_run = true,
            Node::Close(b"t") => in_run = false,
            Node::Text(text) if in_run => {
                if let Some(s) = current.as_mut() {
                    s.push_str(text);
                }
            }
            _ => {}
        }
        true
    })?;
    Ok(strings)
}

/// Non-empty cell values of one sheet in document order, space-separated.
fn sheet_text(xml: &[u8], shared: &[String]) -> Result<String, RagError> {
    let mut cells: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    walk_xml(xml, |node| {
        match node {
            Node::Open(b"c", start) => shared_cell = is_shared_string_cell(start),
            Node::Open(b"v", _) => in_value = true,
            Node::Close(b"v") => in_value = false,
            Node::Text(raw) if in_value => {
                let value = raw.trim();
                let resolved = if shared_cell {
                    value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .map(|s| s.trim())
                } else {
                    Some(value)
                };
                if let Some(v) = resolved.filter(|v| !v.is_empty()) {
                    cells.push(v.to_string());
                }
            }
            _ => {}
        }
        cells.len() < XLSX_MAX_CELLS_PER_SHEET
    })?;
    Ok(cells.join(" "))
}

/// `<c t="s">` holds an index into the shared string table.
fn is_shared_string_cell(start: &BytesStart<'_>) -> bool {
    start
        .attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == b"t" && attr.value.as_ref() == b"s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cfg() -> ExtractConfig {
        ExtractConfig::default()
    }

    fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_media_type_returns_error() {
        let err = extract(b"foo", "application/octet-stream", &cfg()).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_is_corrupt_input() {
        let err = extract(b"not a pdf", MIME_PDF, &cfg()).unwrap_err();
        assert!(matches!(err, RagError::CorruptInput(_)));
    }

    #[test]
    fn invalid_zip_is_corrupt_input() {
        let err = extract(b"not a zip", MIME_DOCX, &cfg()).unwrap_err();
        assert!(matches!(err, RagError::CorruptInput(_)));
    }

    #[test]
    fn plain_text_splits_pages_on_form_feed() {
        let text = "First page has enough text.\u{0C}Second page has enough text.";
        let out = extract(text.as_bytes(), "text/plain; charset=utf-8", &cfg()).unwrap();
        assert_eq!(out.page_count(), 2);
        assert_eq!(out.pages[1], "Second page has enough text.");
        assert_eq!(out.joined(), text);
    }

    #[test]
    fn tiny_pages_are_dropped() {
        let text = "A page with real content in it.\u{0C}  7 \u{0C}Another page of content.";
        let out = extract(text.as_bytes(), MIME_TEXT, &cfg()).unwrap();
        assert_eq!(out.page_count(), 2);
    }

    #[test]
    fn blank_document_is_empty() {
        let err = extract(b"   \n  ", MIME_TEXT, &cfg()).unwrap_err();
        assert!(matches!(err, RagError::EmptyDocument));
    }

    #[test]
    fn invalid_utf8_is_corrupt_input() {
        let err = extract(&[0x66, 0x6f, 0xff, 0xfe], MIME_TEXT, &cfg()).unwrap_err();
        assert!(matches!(err, RagError::CorruptInput(_)));
    }

    #[test]
    fn oversized_input_rejected_before_parsing() {
        let config = ExtractConfig {
            max_input_bytes: 8,
            ..ExtractConfig::default()
        };
        let err = extract(b"0123456789abcdef", MIME_TEXT, &config).unwrap_err();
        assert!(matches!(err, RagError::InputTooLarge { actual: 16, limit: 8, .. }));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>\
            <w:p><w:r><w:t>Refund policy</w:t></w:r></w:p>\
            <w:p><w:r><w:t xml:space=\"preserve\">Items may be </w:t></w:r><w:r><w:t>returned within 30 days.</w:t></w:r></w:p>\
            </w:body></w:document>"
            .to_string();
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let out = extract(&bytes, MIME_DOCX, &cfg()).unwrap();
        assert_eq!(out.page_count(), 1);
        assert_eq!(
            out.pages[0],
            "Refund policy\nItems may be returned within 30 days."
        );
    }

    #[test]
    fn pptx_slides_are_pages_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" xmlns:p=\"p\"><a:t>{}</a:t></p:sld>",
                t
            )
        };
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", slide("Slide ten content")),
            ("ppt/slides/slide2.xml", slide("Slide two content")),
            ("ppt/slides/slide1.xml", slide("Slide one content")),
        ]);
        let out = extract(&bytes, MIME_PPTX, &cfg()).unwrap();
        assert_eq!(
            out.pages,
            vec!["Slide one content", "Slide two content", "Slide ten content"]
        );
    }

    #[test]
    fn xlsx_resolves_shared_strings_per_sheet() {
        let strings = "<sst><si><t>Warranty</t></si><si><r><t>two </t></r><r><t>years</t></r></si></sst>";
        let sheet1 = "<worksheet><sheetData><row>\
            <c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c>\
            </row></sheetData></worksheet>";
        let sheet2 = "<worksheet><sheetData><row>\
            <c r=\"A1\"><v>1250</v></c><c r=\"B1\" t=\"s\"><v>0</v></c>\
            </row></sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", strings.to_string()),
            ("xl/worksheets/sheet2.xml", sheet2.to_string()),
            ("xl/worksheets/sheet1.xml", sheet1.to_string()),
        ]);
        let out = extract(&bytes, MIME_XLSX, &cfg()).unwrap();
        assert_eq!(out.pages, vec!["Warranty two years", "1250 Warranty"]);
    }

    #[test]
    fn media_type_helpers() {
        assert_eq!(normalize_media_type("Text/Plain; charset=UTF-8"), "text/plain");
        assert_eq!(media_type_for_filename("report.PDF"), Some(MIME_PDF));
        assert_eq!(media_type_for_filename("notes.md"), Some(MIME_MARKDOWN));
        assert_eq!(media_type_for_filename("archive.tar"), None);
        assert_eq!(media_type_for_filename("README"), None);
    }
}
