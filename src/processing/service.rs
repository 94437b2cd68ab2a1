//! Service coordinating uploads, index rebuilds, and question answering.

use crate::{
    answer::{AnswerClient, build_answer_client},
    config::{AnswerProvider, Config},
    embedding::build_embedding_client,
    metrics::{MetricsSnapshot, RagMetrics},
    processing::{
        answer::{citation, compose_answer},
        context::{ContextOptions, assemble_context, hit_context},
        indexer::Indexer,
        intent::{HeuristicIntentClassifier, IntentClassifier},
        retriever::Retriever,
        sanitize::{stored_filename, upload_limit_bytes, validate_upload},
        types::{
            IndexOutcome, IntentPlan, QueryOutcome, QueryRequest, SearchParams, ServiceError,
            ServiceInitError, UploadOutcome,
        },
    },
    rerank::build_reranker,
    store::IndexPaths,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-query defaults applied when a request leaves a knob unset.
#[derive(Debug, Clone, Copy)]
struct QueryDefaults {
    top_k: usize,
    use_rerank: bool,
    use_llm: bool,
}

/// Owns every pipeline component and the state shared between requests.
///
/// Capabilities are built once at construction. Construct the service near process start and
/// share it through an `Arc`.
pub struct DocRagService {
    uploads_dir: PathBuf,
    max_upload_mb: usize,
    defaults: QueryDefaults,
    context: ContextOptions,
    indexer: Indexer,
    retriever: Retriever,
    classifier: Box<dyn IntentClassifier>,
    answer_client: Option<Arc<dyn AnswerClient>>,
    reindex_lock: Mutex<()>,
    metrics: Arc<RagMetrics>,
}

/// Abstraction over the service used by the HTTP surface.
#[async_trait]
pub trait DocRagApi: Send + Sync {
    /// Validate and store an uploaded document.
    async fn upload_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, ServiceError>;

    /// Rebuild the index from every stored document.
    async fn reindex(&self) -> Result<IndexOutcome, ServiceError>;

    /// Answer a question from the index.
    async fn query(&self, request: QueryRequest) -> Result<QueryOutcome, ServiceError>;

    /// Retrieve the current metrics snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Largest accepted upload in bytes.
    fn max_upload_bytes(&self) -> usize;
}

impl DocRagService {
    /// Build the service and all of its capabilities from `config`.
    ///
    /// A misconfigured answer backend only disables synthesis; embedding and reranking
    /// failures are fatal.
    pub fn from_config(config: &Config) -> Result<Self, ServiceInitError> {
        tracing::info!(provider = ?config.embedding_provider, "Initializing embedding client");
        let embedding = build_embedding_client(config)?;
        let reranker = build_reranker(config)?;
        let answer_client = match build_answer_client(config) {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "Answer backend disabled; answers will be extractive"
                );
                None
            }
        };

        let paths = IndexPaths::in_dir(&config.index_dir);
        let indexer = Indexer::new(
            Arc::clone(&embedding),
            config.uploads_dir.clone(),
            paths.clone(),
            config.chunk_size,
            config.chunk_overlap,
        )?;
        let retriever = Retriever::new(embedding, reranker, paths, config.retrieve_candidates);

        tracing::info!(
            uploads = %config.uploads_dir.display(),
            index = %config.index_dir.display(),
            rerank = ?config.rerank_provider,
            answer = ?config.answer_provider,
            "Service initialized"
        );

        Ok(Self {
            uploads_dir: config.uploads_dir.clone(),
            max_upload_mb: config.max_upload_mb,
            defaults: QueryDefaults {
                top_k: config.top_k,
                use_rerank: config.use_rerank,
                use_llm: config.answer_provider != AnswerProvider::None,
            },
            context: ContextOptions {
                neighbor_window: config.neighbor_window,
                same_page: config.neighbor_same_page,
                max_blocks: config.max_context_blocks,
            },
            indexer,
            retriever,
            classifier: Box::new(HeuristicIntentClassifier),
            answer_client,
            reindex_lock: Mutex::new(()),
            metrics: Arc::new(RagMetrics::new()),
        })
    }

    /// Directory holding stored uploads.
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Validate an upload and store it as `{doc_id prefix}_{sanitized name}`.
    ///
    /// Storing does not touch the index; call [`DocRagService::reindex`] afterwards.
    pub async fn upload_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, ServiceError> {
        let original_filename = validate_upload(filename, bytes.len(), self.max_upload_mb)?;
        let doc_id = hex::encode(Sha256::digest(&bytes));
        let stored = stored_filename(&doc_id, &original_filename);

        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        tokio::fs::write(self.uploads_dir.join(&stored), &bytes).await?;
        tracing::info!(
            file = %stored,
            bytes = bytes.len(),
            "Stored upload"
        );

        Ok(UploadOutcome {
            doc_id,
            stored_filename: stored,
            original_filename,
        })
    }

    /// Rebuild the index from the uploads directory.
    ///
    /// Rebuilds are serialized. The retriever is invalidated whether or not the rebuild
    /// succeeds, because the previous artifacts are gone either way.
    pub async fn reindex(&self) -> Result<IndexOutcome, ServiceError> {
        let _guard = self.reindex_lock.lock().await;
        let result = self.indexer.rebuild().await;
        self.retriever.invalidate().await;
        let outcome = result?;
        self.metrics
            .record_rebuild(outcome.document_count as u64, outcome.chunk_count as u64);
        Ok(outcome)
    }

    /// Plan for `question` from the configured intent classifier.
    pub fn classify(&self, question: &str) -> IntentPlan {
        self.classifier.classify(question)
    }

    /// Retrieve passages for a question and answer it.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryOutcome, ServiceError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ServiceError::EmptyQuestion);
        }

        let plan = self.classify(question);
        let params = SearchParams {
            question: question.to_string(),
            top_k: request.top_k.unwrap_or(self.defaults.top_k),
            use_rerank: request.use_rerank.unwrap_or(self.defaults.use_rerank),
            doc_id: request.doc_id,
            source_filename: request.source_filename,
        };
        let results = self.retriever.search(&params).await?;
        let citations = results.iter().map(citation).collect();

        let client = if request.use_llm.unwrap_or(self.defaults.use_llm) {
            self.answer_client.as_deref()
        } else {
            None
        };
        let blocks = match client {
            Some(_) if !results.is_empty() => {
                match assemble_context(&self.retriever, &results, &plan, &self.context).await {
                    Ok(blocks) => blocks,
                    Err(error) => {
                        tracing::warn!(
                            error = %error,
                            "Neighbor expansion failed; answering from hits only"
                        );
                        hit_context(&results, &plan, &self.context)
                    }
                }
            }
            _ => Vec::new(),
        };
        let draft = compose_answer(question, &results, &blocks, plan.style, client).await;

        self.metrics.record_query(draft.fell_back);
        tracing::info!(
            plan = %plan.name,
            results = results.len(),
            top_k = params.top_k,
            rerank = params.use_rerank,
            mode = ?draft.mode,
            "Query answered"
        );

        Ok(QueryOutcome {
            answer: draft.text,
            mode: draft.mode,
            style: plan.style,
            citations,
        })
    }

    /// Return the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Largest accepted upload in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        upload_limit_bytes(self.max_upload_mb)
    }
}

#[async_trait]
impl DocRagApi for DocRagService {
    async fn upload_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, ServiceError> {
        DocRagService::upload_document(self, filename, bytes).await
    }

    async fn reindex(&self) -> Result<IndexOutcome, ServiceError> {
        DocRagService::reindex(self).await
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutcome, ServiceError> {
        DocRagService::query(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        DocRagService::metrics_snapshot(self)
    }

    fn max_upload_bytes(&self) -> usize {
        DocRagService::max_upload_bytes(self)
    }
}
