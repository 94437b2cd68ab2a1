//! Text extraction for uploaded documents.
//!
//! PDFs yield one unit per non-empty page (1-based page numbers); Markdown and plain text yield a
//! single unpaginated unit. Each unit also carries the section headings found in it, positioned in
//! the same normalized coordinates the chunker uses.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Extensions accepted for upload and indexing (lowercase, without the dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "md", "markdown", "txt"];

/// Errors raised while turning a document into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// File extension is not one of [`SUPPORTED_EXTENSIONS`].
    #[error("Unsupported document type: {}", .0.display())]
    Unsupported(PathBuf),
    /// PDF parser rejected the document.
    #[error("Failed to extract text from {}: {reason}", .path.display())]
    Pdf {
        /// Offending document.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },
}

/// Kind of source document, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Paginated PDF.
    Pdf,
    /// Markdown file.
    Markdown,
    /// Plain UTF-8 text.
    PlainText,
}

impl DocumentKind {
    /// Classify `path` by extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "md" | "markdown" => Some(Self::Markdown),
            "txt" => Some(Self::PlainText),
            _ => None,
        }
    }
}

/// Heading position inside a unit's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMark {
    /// Normalized character offset where the heading starts.
    pub offset: usize,
    /// Section label, canonical when the heading names a well-known section.
    pub label: String,
}

/// One logical unit of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    /// 1-based page number, `None` for unpaginated sources.
    pub page: Option<u32>,
    /// Raw extracted text; the chunker normalizes it.
    pub text: String,
    /// Headings found in `text`, in offset order.
    pub sections: Vec<SectionMark>,
}

impl TextUnit {
    fn new(page: Option<u32>, text: String, kind: DocumentKind) -> Self {
        let sections = detect_sections(&text, kind == DocumentKind::Markdown);
        Self {
            page,
            text,
            sections,
        }
    }

    /// Label of the last heading starting at or before `offset`.
    pub fn section_at(&self, offset: usize) -> Option<&str> {
        self.sections
            .iter()
            .take_while(|mark| mark.offset <= offset)
            .last()
            .map(|mark| mark.label.as_str())
    }
}

/// Extract text units from the raw bytes of the document at `path`.
pub fn extract_units(path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractionError> {
    let kind =
        DocumentKind::from_path(path).ok_or_else(|| ExtractionError::Unsupported(path.into()))?;

    let units = match kind {
        DocumentKind::Pdf => extract_pdf_pages(path, bytes)?
            .into_iter()
            .map(|(page, text)| TextUnit::new(Some(page), text, kind))
            .collect(),
        DocumentKind::Markdown | DocumentKind::PlainText => {
            let text = String::from_utf8_lossy(bytes).trim().to_string();
            vec![TextUnit::new(None, text, kind)]
        }
    };

    tracing::debug!(path = %path.display(), ?kind, units = units.len(), "Extracted document");
    Ok(units)
}

/// Extract non-empty pages as `(page_number, text)` pairs.
fn extract_pdf_pages(path: &Path, bytes: &[u8]) -> Result<Vec<(u32, String)>, ExtractionError> {
    // pdf-extract panics on some malformed inputs; treat that as an extraction failure.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractionError::Pdf {
            path: path.into(),
            reason: "parser panicked".into(),
        })?
        .map_err(|error| ExtractionError::Pdf {
            path: path.into(),
            reason: error.to_string(),
        })?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter_map(|(index, text)| {
            let text = text.replace('\0', " ").trim().to_string();
            (!text.is_empty()).then(|| (index as u32 + 1, text))
        })
        .collect())
}

static NUMBERING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:\.\d+)*|[IVXivx]+)[.)]?\s+").expect("numbering pattern")
});

const CANONICAL_SECTIONS: &[(&str, &str)] = &[
    ("abstract", "abstract"),
    ("resumen", "abstract"),
    ("summary", "abstract"),
    ("introduction", "introduction"),
    ("introducción", "introduction"),
    ("background", "introduction"),
    ("method", "methods"),
    ("materials and methods", "methods"),
    ("methodology", "methods"),
    ("metodolog", "methods"),
    ("metodología", "methods"),
    ("result", "results"),
    ("resultado", "results"),
    ("discussion", "discussion"),
    ("discusión", "discussion"),
    ("conclusion", "conclusion"),
    ("conclusión", "conclusion"),
    ("conclusiones", "conclusion"),
    ("concluding remarks", "conclusion"),
];

fn normalized_title(title: &str) -> String {
    NUMBERING.replace(title.trim(), "").trim().to_lowercase()
}

/// Map a Markdown heading title to a canonical section tag by prefix.
fn canonical_section(title: &str) -> Option<&'static str> {
    let lowered = normalized_title(title);
    CANONICAL_SECTIONS
        .iter()
        .find(|(prefix, _)| lowered.starts_with(prefix))
        .map(|(_, tag)| *tag)
}

/// Map a whole line to a canonical section tag when it is nothing but a section title.
///
/// Numbering, one trailing colon, and a plural `s` are allowed.
fn bare_section(line: &str) -> Option<&'static str> {
    let lowered = normalized_title(line);
    let title = lowered.strip_suffix(':').unwrap_or(&lowered).trim_end();
    let singular = title.strip_suffix('s');
    CANONICAL_SECTIONS
        .iter()
        .find(|(name, _)| *name == title || Some(*name) == singular)
        .map(|(_, tag)| *tag)
}

fn heading_label(line: &str, markdown: bool) -> Option<String> {
    let trimmed = line.trim();
    if markdown && trimmed.starts_with('#') {
        let title = trimmed.trim_start_matches('#').trim();
        if title.is_empty() {
            return None;
        }
        return Some(
            canonical_section(title)
                .map(str::to_string)
                .unwrap_or_else(|| title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()),
        );
    }
    // Bare section titles ("1. Introduction", "CONCLUSIONS") in PDFs and plain text.
    bare_section(trimmed).map(str::to_string)
}

/// Locate headings in `text`, reporting offsets in whitespace-normalized characters.
pub fn detect_sections(text: &str, markdown: bool) -> Vec<SectionMark> {
    let mut marks = Vec::new();
    let mut emitted = 0_usize;

    for line in text.lines() {
        let mut words = line.split_whitespace().peekable();
        if words.peek().is_none() {
            continue;
        }
        let line_start = if emitted == 0 { 0 } else { emitted + 1 };
        if let Some(label) = heading_label(line, markdown) {
            marks.push(SectionMark {
                offset: line_start,
                label,
            });
        }
        for word in words {
            if emitted > 0 {
                emitted += 1;
            }
            emitted += word.chars().count();
        }
    }

    marks
}
