//! Core data types and error definitions for the retrieval pipeline.

use crate::{
    embedding::EmbeddingClientError,
    extract::ExtractionError,
    rerank::RerankError,
    store::{ChunkRecord, StoreError},
};
use serde::Serialize;
use thiserror::Error;

/// Errors produced while splitting text into windows.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Window parameters cannot produce forward progress.
    #[error("invalid chunking configuration: chunk_size={chunk_size}, overlap={overlap} (need chunk_size > 0 and overlap < chunk_size)")]
    InvalidConfiguration {
        /// Requested window size.
        chunk_size: usize,
        /// Requested overlap.
        overlap: usize,
    },
}

/// Window of normalized text produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Trimmed window text.
    pub text: String,
    /// Start offset in normalized characters.
    pub char_start: usize,
    /// End offset (exclusive) in normalized characters.
    pub char_end: usize,
}

/// Errors emitted while rebuilding the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Chunk parameters were rejected.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// A document could not be turned into text.
    #[error("Failed to extract document: {0}")]
    Extraction(#[from] ExtractionError),
    /// Embedding provider failed to produce vectors for the chunks.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Writing the artifacts failed.
    #[error("Failed to persist index: {0}")]
    Store(#[from] StoreError),
    /// Reading the uploads directory failed.
    #[error("Failed to read documents: {0}")]
    Io(#[from] std::io::Error),
    /// Blocking worker panicked or was cancelled.
    #[error("Indexing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Provider returned a different number of vectors than chunks.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCount {
        /// Number of chunks submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

/// Summary of a completed rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    /// Documents enumerated, including ones that produced no chunks.
    pub document_count: usize,
    /// Chunk records written.
    pub chunk_count: usize,
}

/// Errors emitted while answering a search.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The persisted index is missing or unreadable; a rebuild is required.
    #[error("Index not ready ({0}). Run a reindex first.")]
    IndexNotReady(StoreError),
    /// Embedding provider failed for the query.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Reranker failed for the candidate set.
    #[error("Failed to rerank candidates: {0}")]
    Rerank(#[from] RerankError),
    /// The vector index rejected the query.
    #[error("Vector search failed: {0}")]
    Store(StoreError),
    /// Embedding provider returned no vector for the query.
    #[error("Embedding provider returned no vectors for the query")]
    EmptyEmbedding,
    /// Blocking index load panicked or was cancelled.
    #[error("Index load task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Reranker returned a different number of scores than candidates.
    #[error("Reranker returned {actual} scores for {expected} candidates")]
    RerankCount {
        /// Number of candidates submitted.
        expected: usize,
        /// Number of scores returned.
        actual: usize,
    },
}

impl From<StoreError> for RetrievalError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::IndexNotFound(_) | StoreError::IndexCorrupt { .. } => {
                Self::IndexNotReady(error)
            }
            other => Self::Store(other),
        }
    }
}

/// Parameters of one retrieval call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    /// Natural-language question.
    pub question: String,
    /// Maximum number of results.
    pub top_k: usize,
    /// Replace dense scores with reranker scores.
    pub use_rerank: bool,
    /// Keep only chunks of this document.
    pub doc_id: Option<String>,
    /// Keep only chunks of this stored file.
    pub source_filename: Option<String>,
}

impl SearchParams {
    /// Unfiltered dense search for `question`.
    pub fn new(question: impl Into<String>, top_k: usize) -> Self {
        Self {
            question: question.into(),
            top_k,
            use_rerank: false,
            doc_id: None,
            source_filename: None,
        }
    }

    /// Toggle reranking.
    pub fn with_rerank(mut self, use_rerank: bool) -> Self {
        self.use_rerank = use_rerank;
        self
    }

    /// Whether `record` passes the document and filename filters.
    pub fn accepts(&self, record: &ChunkRecord) -> bool {
        self.doc_id
            .as_deref()
            .is_none_or(|doc_id| record.doc_id == doc_id)
            && self
                .source_filename
                .as_deref()
                .is_none_or(|name| record.source_filename == name)
    }
}

/// Ranked chunk returned by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Matched chunk.
    #[serde(flatten)]
    pub record: ChunkRecord,
    /// Final ranking score.
    pub score: f32,
    /// Dense similarity, kept when a reranker score replaced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_dense: Option<f32>,
}

/// Answer style selected by the intent planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStyle {
    /// General "what is this about" answer.
    Default,
    /// Answer focused on objectives, contributions, and conclusions.
    ObjectivesConclusions,
}

/// Response-shaping plan for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentPlan {
    /// Plan name.
    pub name: String,
    /// Section tags to favor when assembling answer context, most preferred first.
    pub preferred_sections: Vec<String>,
    /// Answer style.
    pub style: AnswerStyle,
}

/// How the answer text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Written by the answer synthesis backend.
    Generative,
    /// Built directly from the top results.
    Extractive,
}

/// Citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// Source document hash.
    pub doc_id: String,
    /// Stored filename.
    pub source_filename: String,
    /// Page number for paginated sources.
    pub page: Option<u32>,
    /// Chunk anchor.
    pub anchor: String,
    /// Detected section, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Final ranking score.
    pub score: f32,
    /// Dense similarity when reranking replaced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_dense: Option<f32>,
    /// Leading excerpt of the chunk text.
    pub snippet: String,
}

/// Query accepted by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    /// Natural-language question.
    pub question: String,
    /// Result count override.
    pub top_k: Option<usize>,
    /// Answer synthesis override.
    pub use_llm: Option<bool>,
    /// Rerank override.
    pub use_rerank: Option<bool>,
    /// Document filter.
    pub doc_id: Option<String>,
    /// Stored filename filter.
    pub source_filename: Option<String>,
}

/// Answer with its supporting citations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// Answer text.
    pub answer: String,
    /// How `answer` was produced.
    pub mode: AnswerMode,
    /// Plan used to shape the answer.
    pub style: AnswerStyle,
    /// Retrieved passages, best first.
    pub citations: Vec<Citation>,
}

/// Stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    /// SHA-256 of the uploaded bytes.
    pub doc_id: String,
    /// Name under which the file was stored.
    pub stored_filename: String,
    /// Sanitized name supplied by the client.
    pub original_filename: String,
}

/// Reasons an upload is refused.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Extension is not PDF, Markdown, or text.
    #[error("Unsupported format. Use PDF, Markdown, or plain text.")]
    UnsupportedFormat,
    /// File exceeds the configured limit.
    #[error("File exceeds the {max_mb} MB upload limit.")]
    TooLarge {
        /// Limit in megabytes.
        max_mb: usize,
    },
    /// Upload has no bytes.
    #[error("Uploaded file is empty.")]
    Empty,
}

/// Errors surfaced by the service to its callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload was refused.
    #[error(transparent)]
    Upload(#[from] UploadError),
    /// Query text was empty.
    #[error("Question must not be empty.")]
    EmptyQuestion,
    /// Rebuild failed; the index may be unavailable until the next successful rebuild.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Retrieval failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// Filesystem failure while storing uploads.
    #[error("Storage failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while constructing the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Embedding backend could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Reranker could not be built.
    #[error("Failed to initialize reranker: {0}")]
    Rerank(#[from] RerankError),
    /// Chunk parameters are unusable.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
}

impl ServiceError {
    /// Whether the caller can fix the failure by rebuilding the index.
    pub fn is_index_not_ready(&self) -> bool {
        matches!(self, Self::Retrieval(RetrievalError::IndexNotReady(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_and_corrupt_artifacts_mean_index_not_ready() {
        let missing: RetrievalError = StoreError::IndexNotFound(PathBuf::from("x")).into();
        assert!(matches!(missing, RetrievalError::IndexNotReady(_)));

        let corrupt: RetrievalError = StoreError::IndexCorrupt {
            path: PathBuf::from("x"),
            reason: "bad".into(),
        }
        .into();
        assert!(matches!(corrupt, RetrievalError::IndexNotReady(_)));

        let mismatch: RetrievalError = StoreError::DimensionMismatch {
            expected: 2,
            actual: 3,
        }
        .into();
        assert!(matches!(mismatch, RetrievalError::Store(_)));
    }

    #[test]
    fn filters_apply_together() {
        let record = ChunkRecord::new(0, "doc-a", "a.md", None, 0, 4, "text");
        let mut params = SearchParams::new("q", 3);
        assert!(params.accepts(&record));

        params.doc_id = Some("doc-a".into());
        assert!(params.accepts(&record));
        params.source_filename = Some("b.md".into());
        assert!(!params.accepts(&record));
    }

    #[test]
    fn retrieval_result_serializes_flat() {
        let result = RetrievalResult {
            record: ChunkRecord::new(4, "doc", "a.md", None, 0, 4, "text"),
            score: 0.5,
            score_dense: None,
        };
        let value = serde_json::to_value(&result).expect("json");
        assert_eq!(value["anchor"], "md:c0-4");
        assert_eq!(value["score"], 0.5);
        assert!(value.get("score_dense").is_none());
    }
}
