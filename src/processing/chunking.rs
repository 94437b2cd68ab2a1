//! Fixed-window character chunking with stable offsets.
//!
//! Text is normalized first (every whitespace run collapsed to one space, ends trimmed) and all
//! offsets refer to that normalized string, counted in Unicode scalar values. Windows advance by
//! `chunk_size - overlap`, so each window after the first repeats the last `overlap` characters
//! of its predecessor:
//!
//! ```text
//! chunk_size = 1100, overlap = 180, len = 2500
//! [0, 1100)  [920, 2020)  [1840, 2500)
//! ```

use super::types::{Chunk, ChunkingError};

/// Collapse whitespace runs to single spaces and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(word);
    }
    normalized
}

/// Split `text` into overlapping windows of `chunk_size` normalized characters.
///
/// - `chunk_size` must be positive and `overlap` strictly smaller than it.
/// - Returns an empty vector for empty or all-whitespace input.
/// - A window whose trimmed text is empty is skipped; its offsets still advance the cursor.
/// - The last window may be shorter than `chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(ChunkingError::InvalidConfiguration {
            chunk_size,
            overlap,
        });
    }

    let clean = normalize_whitespace(text);
    // Byte position of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = clean
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(clean.len()))
        .collect();
    let len = boundaries.len() - 1;
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::with_capacity(len / (chunk_size - overlap) + 1);
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        let window = clean[boundaries[start]..boundaries[end]].trim();
        if !window.is_empty() {
            chunks.push(Chunk {
                text: window.to_string(),
                char_start: start,
                char_end: end,
            });
        }
        if end == len {
            break;
        }
        start = end - overlap;
    }

    tracing::trace!(
        normalized_len = len,
        chunk_size,
        overlap,
        chunks = chunks.len(),
        "Chunked text"
    );
    Ok(chunks)
}
