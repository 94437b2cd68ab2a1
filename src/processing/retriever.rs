//! Dense retrieval over the persisted index with optional reranking and neighbor expansion.

use super::types::{RetrievalError, RetrievalResult, SearchParams};
use crate::{
    embedding::EmbeddingClient,
    rerank::Reranker,
    store::{ChunkRecord, FlatIndex, IndexPaths, MetadataStore},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Candidates fetched per requested result before filtering and dedupe.
const CANDIDATE_MULTIPLIER: usize = 8;

/// Artifacts held in memory between rebuilds.
struct LoadedIndex {
    vectors: FlatIndex,
    records: HashMap<u64, ChunkRecord>,
}

impl LoadedIndex {
    /// Read both artifacts on the blocking pool.
    async fn read(paths: &IndexPaths) -> Result<Self, RetrievalError> {
        let paths = paths.clone();
        tokio::task::spawn_blocking(move || Self::read_blocking(&paths)).await?
    }

    fn read_blocking(paths: &IndexPaths) -> Result<Self, RetrievalError> {
        let vectors = FlatIndex::load(&paths.vectors)?;
        let records = MetadataStore::load(&paths.metadata)?;
        tracing::info!(
            rows = vectors.len(),
            records = records.len(),
            dimension = vectors.dimension(),
            "Loaded index"
        );
        Ok(Self { vectors, records })
    }
}

/// Answers searches against the index, loading it on first use.
///
/// The loaded artifacts are cached until [`Retriever::invalidate`] is called; a rebuild must be
/// followed by an invalidation for searches to observe it. Loading runs on the blocking pool
/// while concurrent callers wait on the async lock, so only one load happens per invalidation.
pub struct Retriever {
    embedding: Arc<dyn EmbeddingClient>,
    reranker: Arc<dyn Reranker>,
    paths: IndexPaths,
    retrieve_candidates: usize,
    state: RwLock<Option<Arc<LoadedIndex>>>,
}

impl Retriever {
    /// Create an unloaded retriever over the artifacts at `paths`.
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        reranker: Arc<dyn Reranker>,
        paths: IndexPaths,
        retrieve_candidates: usize,
    ) -> Self {
        Self {
            embedding,
            reranker,
            paths,
            retrieve_candidates,
            state: RwLock::new(None),
        }
    }

    /// Read both artifacts from disk, replacing anything already loaded.
    pub async fn load(&self) -> Result<(), RetrievalError> {
        let mut state = self.state.write().await;
        *state = Some(Arc::new(LoadedIndex::read(&self.paths).await?));
        Ok(())
    }

    /// Drop the cached index; the next search reloads it from disk.
    pub async fn invalidate(&self) {
        self.state.write().await.take();
        tracing::debug!("Retriever invalidated");
    }

    /// Whether an index is currently cached.
    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.is_some()
    }

    async fn current(&self) -> Result<Arc<LoadedIndex>, RetrievalError> {
        if let Some(loaded) = self.state.read().await.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let mut state = self.state.write().await;
        if let Some(loaded) = state.as_ref() {
            return Ok(Arc::clone(loaded));
        }
        let loaded = Arc::new(LoadedIndex::read(&self.paths).await?);
        *state = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Return up to `top_k` distinct passages for the question, best first.
    ///
    /// Empty candidate sets (empty index, filters matching nothing, `top_k == 0`) produce an
    /// empty result rather than an error.
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let index = self.current().await?;
        if params.top_k == 0 || index.records.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .embedding
            .generate_embeddings(vec![params.question.clone()])
            .await?;
        let query = vectors.pop().ok_or(RetrievalError::EmptyEmbedding)?;

        let fetch = self
            .retrieve_candidates
            .max(params.top_k.saturating_mul(CANDIDATE_MULTIPLIER));
        let hits = index.vectors.search(&query, fetch)?;

        let mut stale = 0_usize;
        let mut candidates: Vec<RetrievalResult> = hits
            .hits()
            .filter_map(|(id, score)| match index.records.get(&id) {
                Some(record) => Some(RetrievalResult {
                    record: record.clone(),
                    score,
                    score_dense: None,
                }),
                None => {
                    stale += 1;
                    None
                }
            })
            .filter(|candidate| params.accepts(&candidate.record))
            .collect();
        if stale > 0 {
            tracing::warn!(stale, "Vector ids without metadata were skipped");
        }
        if candidates.is_empty() {
            tracing::debug!(fetch, "No candidates after filtering");
            return Ok(Vec::new());
        }

        if params.use_rerank {
            let passages: Vec<String> = candidates
                .iter()
                .map(|candidate| candidate.record.text.clone())
                .collect();
            let scores = self.reranker.score(&params.question, &passages).await?;
            if scores.len() != candidates.len() {
                return Err(RetrievalError::RerankCount {
                    expected: candidates.len(),
                    actual: scores.len(),
                });
            }
            for (candidate, score) in candidates.iter_mut().zip(scores) {
                candidate.score_dense = Some(candidate.score);
                candidate.score = score;
            }
        }

        // Stable, so dense order survives among equal rerank scores.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let candidate_count = candidates.len();
        let mut seen = HashSet::new();
        let results: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter(|candidate| {
                let (source, anchor) = candidate.record.passage_key();
                seen.insert((source.to_string(), anchor.to_string()))
            })
            .take(params.top_k)
            .collect();

        tracing::debug!(
            fetch,
            candidates = candidate_count,
            results = results.len(),
            rerank = params.use_rerank,
            "Search complete"
        );
        Ok(results)
    }

    /// Up to `n` records immediately preceding `chunk_id`, in ascending id order.
    ///
    /// Expansion stops at a different source file, and with `same_page` at a different page.
    /// Unknown ids have no neighbors.
    pub async fn neighbors(
        &self,
        chunk_id: u64,
        n: usize,
        same_page: bool,
    ) -> Result<Vec<ChunkRecord>, RetrievalError> {
        let index = self.current().await?;
        let Some(seed) = index.records.get(&chunk_id) else {
            return Ok(Vec::new());
        };

        let lowest = chunk_id.saturating_sub(n as u64);
        let mut neighbors = Vec::new();
        for id in (lowest..chunk_id).rev() {
            let Some(record) = index.records.get(&id) else {
                break;
            };
            if record.source_filename != seed.source_filename
                || (same_page && record.page != seed.page)
            {
                break;
            }
            neighbors.push(record.clone());
        }
        neighbors.reverse();
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingClient;
    use crate::rerank::{LexicalReranker, RerankError};
    use async_trait::async_trait;
    use std::path::Path;

    const DIMENSION: usize = 64;

    struct ShortReranker;

    #[async_trait]
    impl Reranker for ShortReranker {
        async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, RerankError> {
            Ok(vec![1.0])
        }
    }

    async fn write_index(dir: &Path, records: &[ChunkRecord]) -> IndexPaths {
        let paths = IndexPaths::in_dir(dir);
        let texts = records.iter().map(|record| record.text.clone()).collect();
        let vectors = HashEmbeddingClient::new(DIMENSION)
            .generate_embeddings(texts)
            .await
            .expect("embeddings");
        let mut index = FlatIndex::new(DIMENSION);
        index.add(&vectors).expect("add");
        index.save(&paths.vectors).expect("save vectors");
        MetadataStore::write(&paths.metadata, records).expect("save metadata");
        paths
    }

    fn retriever(paths: IndexPaths) -> Retriever {
        Retriever::new(
            Arc::new(HashEmbeddingClient::new(DIMENSION)),
            Arc::new(LexicalReranker),
            paths,
            4,
        )
    }

    fn corpus() -> Vec<ChunkRecord> {
        vec![
            ChunkRecord::new(0, "d1", "soil.md", None, 0, 40, "soil moisture sensors in dry farms"),
            ChunkRecord::new(1, "d1", "soil.md", None, 30, 70, "irrigation schedules for dry farms"),
            ChunkRecord::new(2, "d2", "stars.pdf", Some(1), 0, 40, "stellar spectra and red giants"),
            ChunkRecord::new(3, "d2", "stars.pdf", Some(1), 30, 70, "red giants lose mass late in life"),
            ChunkRecord::new(4, "d2", "stars.pdf", Some(2), 0, 40, "white dwarfs cool over billions of years"),
        ]
    }

    #[tokio::test]
    async fn missing_index_is_not_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = retriever(IndexPaths::in_dir(dir.path()));
        let error = retriever
            .search(&SearchParams::new("anything", 3))
            .await
            .expect_err("no index");
        assert!(matches!(error, RetrievalError::IndexNotReady(_)));
        assert!(!retriever.is_loaded().await);
    }

    #[tokio::test]
    async fn search_returns_distinct_ranked_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = retriever(write_index(dir.path(), &corpus()).await);

        let results = retriever
            .search(&SearchParams::new("red giants", 3))
            .await
            .expect("search");
        assert!(!results.is_empty() && results.len() <= 3);
        assert_eq!(results[0].record.source_filename, "stars.pdf");
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let keys: HashSet<(&str, &str)> = results.iter().map(|r| r.record.passage_key()).collect();
        assert_eq!(keys.len(), results.len());
    }

    #[tokio::test]
    async fn duplicate_passages_are_collapsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let records = vec![
            ChunkRecord::new(0, "d1", "a.md", None, 0, 20, "repeated passage text"),
            ChunkRecord::new(1, "d1", "a.md", None, 0, 20, "repeated passage text"),
            ChunkRecord::new(2, "d1", "a.md", None, 1, 20, "repeated passage text"),
        ];
        let retriever = retriever(write_index(dir.path(), &records).await);

        let results = retriever
            .search(&SearchParams::new("repeated passage", 5))
            .await
            .expect("search");
        let ids: Vec<u64> = results.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[tokio::test]
    async fn rerank_reorders_without_altering_passages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let records = corpus();
        let retriever = retriever(write_index(dir.path(), &records).await);

        let results = retriever
            .search(&SearchParams::new("dry farms irrigation", 5).with_rerank(true))
            .await
            .expect("search");
        assert!(!results.is_empty());
        for result in &results {
            assert_eq!(result.record, records[result.record.id as usize]);
            assert!(result.score_dense.is_some());
        }
        assert_eq!(results[0].record.id, 1);
    }

    #[tokio::test]
    async fn rerank_score_count_is_checked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = write_index(dir.path(), &corpus()).await;
        let retriever = Retriever::new(
            Arc::new(HashEmbeddingClient::new(DIMENSION)),
            Arc::new(ShortReranker),
            paths,
            4,
        );

        let error = retriever
            .search(&SearchParams::new("red giants", 3).with_rerank(true))
            .await
            .expect_err("short scores");
        assert!(matches!(error, RetrievalError::RerankCount { actual: 1, .. }));
    }

    #[tokio::test]
    async fn filters_and_zero_top_k_yield_empty_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = retriever(write_index(dir.path(), &corpus()).await);

        let mut params = SearchParams::new("red giants", 5);
        params.source_filename = Some("soil.md".into());
        let results = retriever.search(&params).await.expect("search");
        assert!(results.iter().all(|r| r.record.source_filename == "soil.md"));

        params.doc_id = Some("d2".into());
        assert!(retriever.search(&params).await.expect("search").is_empty());

        assert!(
            retriever
                .search(&SearchParams::new("red giants", 0))
                .await
                .expect("search")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn empty_index_returns_no_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = retriever(write_index(dir.path(), &[]).await);
        let results = retriever
            .search(&SearchParams::new("anything", 5))
            .await
            .expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn neighbors_respect_page_and_file_boundaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = retriever(write_index(dir.path(), &corpus()).await);

        let ids = |records: Vec<ChunkRecord>| records.iter().map(|r| r.id).collect::<Vec<_>>();
        let around = |id, n, same_page| retriever.neighbors(id, n, same_page);
        assert_eq!(ids(around(3, 2, true).await.expect("n")), vec![2]);
        assert_eq!(ids(around(4, 2, true).await.expect("n")), Vec::<u64>::new());
        assert_eq!(ids(around(4, 2, false).await.expect("n")), vec![2, 3]);
        // Chunk 2 starts stars.pdf; chunk 1 belongs to soil.md.
        assert_eq!(ids(around(2, 3, false).await.expect("n")), Vec::<u64>::new());
        assert_eq!(ids(around(0, 3, false).await.expect("n")), Vec::<u64>::new());
        assert!(around(99, 3, false).await.expect("n").is_empty());
    }

    #[tokio::test]
    async fn unbounded_top_k_returns_every_distinct_passage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = retriever(write_index(dir.path(), &corpus()).await);

        let results = retriever
            .search(&SearchParams::new("red giants", usize::MAX))
            .await
            .expect("search");
        assert_eq!(results.len(), corpus().len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_first_searches_share_one_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = Arc::new(retriever(write_index(dir.path(), &corpus()).await));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let retriever = Arc::clone(&retriever);
                tokio::spawn(async move {
                    retriever
                        .search(&SearchParams::new("white dwarfs", 2))
                        .await
                        .map(|results| results.len())
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.expect("join").expect("search"), 2);
        }
        assert!(retriever.is_loaded().await);
    }

    #[tokio::test]
    async fn invalidate_forces_reload_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = write_index(dir.path(), &corpus()).await;
        let retriever = retriever(paths.clone());

        retriever.load().await.expect("load");
        assert!(retriever.is_loaded().await);
        paths.remove().expect("remove");

        // Cached artifacts keep serving until invalidated.
        assert!(!retriever.search(&SearchParams::new("soil", 2)).await.expect("cached").is_empty());

        retriever.invalidate().await;
        let error = retriever
            .search(&SearchParams::new("soil", 2))
            .await
            .expect_err("reload fails");
        assert!(matches!(error, RetrievalError::IndexNotReady(_)));
    }
}
