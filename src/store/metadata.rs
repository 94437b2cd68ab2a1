//! Chunk metadata sidecar: one JSON object per line, ordered by id.

use super::{StoreError, open_artifact};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Persistent description of one indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Dense zero-based id; equals the row of the chunk's vector.
    pub id: u64,
    /// SHA-256 of the source file contents.
    pub doc_id: String,
    /// Stored filename of the source document.
    pub source_filename: String,
    /// 1-based page number for paginated sources.
    pub page: Option<u32>,
    /// Start offset in the normalized text of the page or file.
    pub char_start: usize,
    /// End offset (exclusive) in the normalized text of the page or file.
    pub char_end: usize,
    /// Position label derived from `page`, `char_start`, and `char_end`.
    pub anchor: String,
    /// Chunk text.
    pub text: String,
    /// Coarse document section the chunk starts in, when one was detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl ChunkRecord {
    /// Build a record, deriving its anchor.
    pub fn new(
        id: u64,
        doc_id: impl Into<String>,
        source_filename: impl Into<String>,
        page: Option<u32>,
        char_start: usize,
        char_end: usize,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            doc_id: doc_id.into(),
            source_filename: source_filename.into(),
            page,
            char_start,
            char_end,
            anchor: anchor_for(page, char_start, char_end),
            text: text.into(),
            section: None,
        }
    }

    /// Attach a section label.
    pub fn with_section(mut self, section: Option<String>) -> Self {
        self.section = section;
        self
    }

    /// Key identifying the same passage across results and index builds.
    pub fn passage_key(&self) -> (&str, &str) {
        (&self.source_filename, &self.anchor)
    }

    fn validate(&self) -> Result<(), String> {
        if self.char_start >= self.char_end {
            return Err(format!(
                "record {} has empty span {}..{}",
                self.id, self.char_start, self.char_end
            ));
        }
        let expected = anchor_for(self.page, self.char_start, self.char_end);
        if self.anchor != expected {
            return Err(format!(
                "record {} has anchor {:?}, expected {expected:?}",
                self.id, self.anchor
            ));
        }
        Ok(())
    }
}

/// Position label: `p{page}:c{start}-{end}` for paginated sources, `md:c{start}-{end}` otherwise.
pub fn anchor_for(page: Option<u32>, char_start: usize, char_end: usize) -> String {
    match page {
        Some(page) => format!("p{page}:c{char_start}-{char_end}"),
        None => format!("md:c{char_start}-{char_end}"),
    }
}

/// Reader and writer for the JSONL sidecar.
pub struct MetadataStore;

impl MetadataStore {
    /// Write `records` to `path`, one JSON object per line, in the given order.
    pub fn write(path: &Path, records: &[ChunkRecord]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        tracing::debug!(path = %path.display(), records = records.len(), "Wrote chunk metadata");
        Ok(())
    }

    /// Load and validate every record, keyed by id.
    ///
    /// Blank lines are ignored. Malformed JSON, inconsistent anchors, and duplicate ids are
    /// reported as [`StoreError::IndexCorrupt`] with the offending line number.
    pub fn load(path: &Path) -> Result<HashMap<u64, ChunkRecord>, StoreError> {
        let reader = BufReader::new(open_artifact(path)?);
        let mut records = HashMap::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(&line).map_err(|error| {
                StoreError::corrupt(path, format!("line {line_number}: {error}"))
            })?;
            record
                .validate()
                .map_err(|reason| StoreError::corrupt(path, format!("line {line_number}: {reason}")))?;
            let id = record.id;
            if records.insert(id, record).is_some() {
                return Err(StoreError::corrupt(
                    path,
                    format!("line {line_number}: duplicate id {id}"),
                ));
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anchors_distinguish_paginated_and_flat_sources() {
        assert_eq!(anchor_for(Some(3), 920, 2020), "p3:c920-2020");
        assert_eq!(anchor_for(None, 0, 1100), "md:c0-1100");
    }

    #[test]
    fn one_character_shift_changes_anchor() {
        let a = ChunkRecord::new(0, "d", "paper.pdf", Some(1), 0, 1100, "x");
        let b = ChunkRecord::new(1, "d", "paper.pdf", Some(1), 1, 1100, "x");
        assert_ne!(a.passage_key(), b.passage_key());
    }

    #[test]
    fn write_then_load_keeps_fields_and_line_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        let records = vec![
            ChunkRecord::new(0, "abc", "notes.md", None, 0, 12, "first chunk")
                .with_section(Some("introduction".into())),
            ChunkRecord::new(1, "def", "paper.pdf", Some(2), 0, 9, "second"),
        ];
        MetadataStore::write(&path, &records).expect("write");

        let raw = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines[0]["id"], 0);
        assert_eq!(lines[0]["anchor"], "md:c0-12");
        assert_eq!(lines[0]["section"], "introduction");
        assert_eq!(lines[1]["page"], 2);
        assert!(lines[1].get("section").is_none());

        let loaded = MetadataStore::load(&path).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[&0], records[0]);
        assert_eq!(loaded[&1], records[1]);
    }

    #[test]
    fn load_accepts_null_page_and_missing_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        let line = json!({
            "id": 7,
            "doc_id": "abc",
            "source_filename": "notes.md",
            "page": null,
            "char_start": 5,
            "char_end": 10,
            "anchor": "md:c5-10",
            "text": "hello"
        });
        std::fs::write(&path, format!("{line}\n\n")).expect("write");

        let loaded = MetadataStore::load(&path).expect("load");
        assert_eq!(loaded[&7].page, None);
        assert_eq!(loaded[&7].section, None);
    }

    #[test]
    fn load_rejects_inconsistent_anchor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        let line = json!({
            "id": 0,
            "doc_id": "abc",
            "source_filename": "notes.md",
            "page": 1,
            "char_start": 0,
            "char_end": 10,
            "anchor": "md:c0-10",
            "text": "hello"
        });
        std::fs::write(&path, format!("{line}\n")).expect("write");

        let error = MetadataStore::load(&path).expect_err("corrupt");
        assert!(matches!(error, StoreError::IndexCorrupt { reason, .. } if reason.starts_with("line 1")));
    }

    #[test]
    fn load_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        let record = ChunkRecord::new(0, "abc", "notes.md", None, 0, 5, "hello");
        MetadataStore::write(&path, &[record.clone(), record]).expect("write");

        let error = MetadataStore::load(&path).expect_err("duplicate");
        assert!(matches!(error, StoreError::IndexCorrupt { reason, .. } if reason.contains("duplicate")));
    }

    #[test]
    fn load_of_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            MetadataStore::load(&dir.path().join("chunks.jsonl")),
            Err(StoreError::IndexNotFound(_))
        ));
    }
}
