//! Full rebuild of the persisted index from the uploads directory.

use super::{
    chunking::chunk_text,
    types::{ChunkingError, IndexError, IndexOutcome},
};
use crate::{
    embedding::EmbeddingClient,
    extract::{SUPPORTED_EXTENSIONS, extract_units},
    store::{ChunkRecord, FlatIndex, IndexPaths, MetadataStore},
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Rebuilds the vector index and metadata sidecar from scratch.
pub struct Indexer {
    embedding: Arc<dyn EmbeddingClient>,
    uploads_dir: PathBuf,
    paths: IndexPaths,
    chunk_size: usize,
    overlap: usize,
}

impl Indexer {
    /// Create an indexer reading from `uploads_dir` and writing to `paths`.
    ///
    /// Chunk parameters are validated here so a bad configuration never deletes the live index.
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        uploads_dir: impl Into<PathBuf>,
        paths: IndexPaths,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self, ChunkingError> {
        chunk_text("", chunk_size, overlap)?;
        Ok(Self {
            embedding,
            uploads_dir: uploads_dir.into(),
            paths,
            chunk_size,
            overlap,
        })
    }

    /// Artifact locations written by this indexer.
    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Rebuild from every supported document in the uploads directory.
    pub async fn rebuild(&self) -> Result<IndexOutcome, IndexError> {
        let uploads_dir = self.uploads_dir.clone();
        let documents = tokio::task::spawn_blocking(move || list_documents(&uploads_dir)).await??;
        self.rebuild_from(documents).await
    }

    /// Rebuild from an explicit, already ordered document list.
    ///
    /// Existing artifacts are deleted before anything new is written, so a failure part way
    /// through leaves no index rather than a stale one.
    pub async fn rebuild_from(&self, documents: Vec<PathBuf>) -> Result<IndexOutcome, IndexError> {
        let document_count = documents.len();
        tracing::info!(documents = document_count, "Rebuilding index");

        let paths = self.paths.clone();
        let (chunk_size, overlap) = (self.chunk_size, self.overlap);
        let records = tokio::task::spawn_blocking(move || -> Result<Vec<ChunkRecord>, IndexError> {
            paths.remove()?;
            build_records(&documents, chunk_size, overlap)
        })
        .await??;

        let vectors = if records.is_empty() {
            Vec::new()
        } else {
            let texts = records.iter().map(|record| record.text.clone()).collect();
            self.embedding.generate_embeddings(texts).await?
        };
        if vectors.len() != records.len() {
            return Err(IndexError::EmbeddingCount {
                expected: records.len(),
                actual: vectors.len(),
            });
        }

        let mut index = FlatIndex::new(self.embedding.dimension());
        index.add(&vectors)?;

        let paths = self.paths.clone();
        let chunk_count = tokio::task::spawn_blocking(move || -> Result<usize, IndexError> {
            index.save(&paths.vectors)?;
            MetadataStore::write(&paths.metadata, &records)?;
            Ok(records.len())
        })
        .await??;

        tracing::info!(
            documents = document_count,
            chunks = chunk_count,
            dimension = self.embedding.dimension(),
            "Index rebuilt"
        );
        Ok(IndexOutcome {
            document_count,
            chunk_count,
        })
    }
}

/// Supported files directly inside `uploads_dir`, sorted by file name.
///
/// A missing directory is an empty corpus.
pub fn list_documents(uploads_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if !uploads_dir.is_dir() {
        tracing::debug!(path = %uploads_dir.display(), "Uploads directory missing");
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(uploads_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let supported = entry
            .path()
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .is_some_and(|extension| SUPPORTED_EXTENSIONS.contains(&extension.as_str()));
        if supported {
            documents.push(entry.into_path());
        }
    }
    Ok(documents)
}

fn build_records(
    documents: &[PathBuf],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkRecord>, IndexError> {
    let mut records: Vec<ChunkRecord> = Vec::new();

    for path in documents {
        let bytes = std::fs::read(path)?;
        let doc_id = hex::encode(Sha256::digest(&bytes));
        let source_filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let units = extract_units(path, &bytes)?;

        let first_id = records.len();
        // Section in effect at the end of the previous page.
        let mut carried: Option<String> = None;
        for unit in &units {
            for chunk in chunk_text(&unit.text, chunk_size, overlap)? {
                let section = unit
                    .section_at(chunk.char_start)
                    .map(str::to_string)
                    .or_else(|| carried.clone());
                let record = ChunkRecord::new(
                    records.len() as u64,
                    &doc_id,
                    &source_filename,
                    unit.page,
                    chunk.char_start,
                    chunk.char_end,
                    chunk.text,
                )
                .with_section(section);
                records.push(record);
            }
            if let Some(mark) = unit.sections.last() {
                carried = Some(mark.label.clone());
            }
        }

        tracing::debug!(
            file = %source_filename,
            doc_id = %&doc_id[..12],
            units = units.len(),
            chunks = records.len() - first_id,
            "Chunked document"
        );
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClientError, HashEmbeddingClient};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingClient for FailingEmbedding {
        fn dimension(&self) -> usize {
            8
        }

        async fn generate_embeddings(
            &self,
            _texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Err(EmbeddingClientError::ProviderUnavailable("offline".into()))
        }
    }

    struct ShortEmbedding;

    #[async_trait]
    impl EmbeddingClient for ShortEmbedding {
        fn dimension(&self) -> usize {
            2
        }

        async fn generate_embeddings(
            &self,
            _texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(vec![vec![1.0, 0.0]])
        }
    }

    fn indexer(
        root: &Path,
        embedding: Arc<dyn EmbeddingClient>,
        chunk_size: usize,
        overlap: usize,
    ) -> Indexer {
        Indexer::new(
            embedding,
            root.join("uploads"),
            IndexPaths::in_dir(&root.join("index")),
            chunk_size,
            overlap,
        )
        .expect("indexer")
    }

    fn write_upload(root: &Path, name: &str, contents: &str) {
        let uploads = root.join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join(name), contents).expect("write upload");
    }

    #[test]
    fn list_documents_filters_and_sorts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_upload(dir.path(), "b_notes.md", "b");
        write_upload(dir.path(), "a_paper.PDF", "a");
        write_upload(dir.path(), "c.txt", "c");
        write_upload(dir.path(), "image.png", "x");
        std::fs::create_dir_all(dir.path().join("uploads/nested.md")).expect("nested dir");

        let names: Vec<String> = list_documents(&dir.path().join("uploads"))
            .expect("list")
            .iter()
            .map(|path| path.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_paper.PDF", "b_notes.md", "c.txt"]);

        assert!(list_documents(&dir.path().join("missing")).expect("missing").is_empty());
    }

    #[test]
    fn invalid_chunk_parameters_are_rejected_up_front() {
        let result = Indexer::new(
            Arc::new(HashEmbeddingClient::new(8)),
            "uploads",
            IndexPaths::in_dir(Path::new("index")),
            100,
            100,
        );
        assert!(matches!(result, Err(ChunkingError::InvalidConfiguration { .. })));
    }

    #[tokio::test]
    async fn rebuild_assigns_dense_ids_and_unique_anchors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = "word ".repeat(120);
        write_upload(dir.path(), "one.md", &body);
        write_upload(dir.path(), "two.md", &body);
        write_upload(dir.path(), "empty.md", "   \n\n ");

        let indexer = indexer(dir.path(), Arc::new(HashEmbeddingClient::new(16)), 100, 20);
        let outcome = indexer.rebuild().await.expect("rebuild");
        assert_eq!(outcome.document_count, 3);
        assert!(outcome.chunk_count > 2);

        let records = MetadataStore::load(&indexer.paths().metadata).expect("metadata");
        let index = FlatIndex::load(&indexer.paths().vectors).expect("vectors");
        assert_eq!(records.len(), outcome.chunk_count);
        assert_eq!(index.len(), outcome.chunk_count);
        for id in 0..outcome.chunk_count as u64 {
            assert!(records.contains_key(&id), "missing id {id}");
        }

        let keys: HashSet<(&str, &str)> = records.values().map(ChunkRecord::passage_key).collect();
        assert_eq!(keys.len(), records.len());

        // Identical contents share a doc_id but not a source filename.
        let doc_ids: HashSet<&str> = records.values().map(|record| record.doc_id.as_str()).collect();
        assert_eq!(doc_ids.len(), 1);
    }

    #[tokio::test]
    async fn empty_corpus_writes_empty_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let indexer = indexer(dir.path(), Arc::new(HashEmbeddingClient::new(16)), 100, 20);

        let outcome = indexer.rebuild().await.expect("rebuild");
        assert_eq!(outcome, IndexOutcome { document_count: 0, chunk_count: 0 });
        assert!(indexer.paths().exist());
        assert!(FlatIndex::load(&indexer.paths().vectors).expect("vectors").is_empty());
    }

    #[tokio::test]
    async fn failed_rebuild_leaves_no_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_upload(dir.path(), "one.md", "some text to embed");
        let good = indexer(dir.path(), Arc::new(HashEmbeddingClient::new(8)), 100, 20);
        good.rebuild().await.expect("initial rebuild");
        assert!(good.paths().exist());

        let failing = indexer(dir.path(), Arc::new(FailingEmbedding), 100, 20);
        let error = failing.rebuild().await.expect_err("embedding failure");
        assert!(matches!(error, IndexError::Embedding(_)));
        assert!(!failing.paths().vectors.exists());
        assert!(!failing.paths().metadata.exists());
    }

    #[tokio::test]
    async fn rebuild_rejects_short_embedding_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_upload(dir.path(), "one.md", &"token ".repeat(60));
        let indexer = indexer(dir.path(), Arc::new(ShortEmbedding), 100, 20);

        let error = indexer.rebuild().await.expect_err("count mismatch");
        assert!(matches!(error, IndexError::EmbeddingCount { actual: 1, .. }));
    }

    #[tokio::test]
    async fn chunks_carry_the_section_they_start_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = format!(
            "# Abstract\n{}\n# Conclusion\n{}",
            "alpha ".repeat(20),
            "omega ".repeat(20)
        );
        write_upload(dir.path(), "paper.md", &text);
        let indexer = indexer(dir.path(), Arc::new(HashEmbeddingClient::new(8)), 60, 0);
        indexer.rebuild().await.expect("rebuild");

        let records = MetadataStore::load(&indexer.paths().metadata).expect("metadata");
        let mut ordered: Vec<&ChunkRecord> = records.values().collect();
        ordered.sort_by_key(|record| record.id);
        assert_eq!(ordered[0].section.as_deref(), Some("abstract"));
        assert_eq!(
            ordered.last().expect("last").section.as_deref(),
            Some("conclusion")
        );
    }
}
