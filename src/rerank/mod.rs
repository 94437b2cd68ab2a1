//! Reranking capability: score `(query, passage)` pairs for the second retrieval stage.
//!
//! Scores are only compared with each other within one query, so backends are free to use any
//! scale. Output order always matches input order.

use crate::config::{Config, RerankProvider};
use crate::embedding::tokenize;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by reranking backends.
#[derive(Debug, Error)]
pub enum RerankError {
    /// Backend could not be reached.
    #[error("Reranker unavailable: {0}")]
    ProviderUnavailable(String),
    /// Backend answered with an error or an unusable payload.
    #[error("Failed to score passages: {0}")]
    ScoringFailed(String),
}

/// Interface implemented by reranking backends.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each passage against `query`, returning one score per passage in input order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError>;
}

/// Deterministic reranker based on query-term coverage.
///
/// The score is the fraction of distinct query terms found in the passage plus half the fraction
/// of query bigrams found in order. Single-character terms are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalReranker;

impl LexicalReranker {
    /// Construct the lexical reranker.
    pub const fn new() -> Self {
        Self
    }

    fn score_one(query_terms: &[String], query_bigrams: &[(String, String)], passage: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let passage_terms: Vec<String> = tokenize(passage).collect();
        let vocabulary: HashSet<&str> = passage_terms.iter().map(String::as_str).collect();
        let passage_bigrams: HashSet<(&str, &str)> = passage_terms
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect();

        let covered = query_terms
            .iter()
            .filter(|term| vocabulary.contains(term.as_str()))
            .count();
        let mut score = covered as f32 / query_terms.len() as f32;

        if !query_bigrams.is_empty() {
            let matched = query_bigrams
                .iter()
                .filter(|(a, b)| passage_bigrams.contains(&(a.as_str(), b.as_str())))
                .count();
            score += 0.5 * matched as f32 / query_bigrams.len() as f32;
        }
        score
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        let ordered: Vec<String> = tokenize(query).filter(|term| term.chars().count() > 1).collect();
        let mut seen = HashSet::new();
        let terms: Vec<String> = ordered
            .iter()
            .filter(|term| seen.insert(term.as_str()))
            .cloned()
            .collect();
        let bigrams: Vec<(String, String)> = ordered
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        Ok(passages
            .iter()
            .map(|passage| Self::score_one(&terms, &bigrams, passage))
            .collect())
    }
}

/// Cross-encoder served over HTTP with a Text-Embeddings-Inference style `/rerank` endpoint.
pub struct HttpReranker {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpReranker {
    /// Build an adapter for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RerankError> {
        let http = Client::builder()
            .user_agent("doc-rag/rerank")
            .build()
            .map_err(|error| RerankError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/rerank", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({ "query": query, "texts": passages, "raw_scores": true }))
            .send()
            .await
            .map_err(|error| {
                RerankError::ProviderUnavailable(format!(
                    "failed to reach reranker at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError::ScoringFailed(format!(
                "reranker returned {status}: {body}"
            )));
        }

        let hits: Vec<RerankHit> = response.json().await.map_err(|error| {
            RerankError::ScoringFailed(format!("failed to decode reranker response: {error}"))
        })?;

        // The service sorts by score; put results back in passage order.
        let mut scores = vec![None; passages.len()];
        for hit in hits {
            let slot = scores.get_mut(hit.index).ok_or_else(|| {
                RerankError::ScoringFailed(format!("reranker returned unknown index {}", hit.index))
            })?;
            *slot = Some(hit.score);
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(index, score)| {
                score.ok_or_else(|| {
                    RerankError::ScoringFailed(format!("reranker omitted passage {index}"))
                })
            })
            .collect()
    }
}

/// Build the reranker selected by configuration.
pub fn build_reranker(config: &Config) -> Result<Arc<dyn Reranker>, RerankError> {
    match config.rerank_provider {
        RerankProvider::Lexical => Ok(Arc::new(LexicalReranker::new())),
        RerankProvider::Http => {
            let url = config.rerank_url.clone().ok_or_else(|| {
                RerankError::ProviderUnavailable("DOC_RAG_RERANK_URL is not set".into())
            })?;
            Ok(Arc::new(HttpReranker::new(url)?))
        }
    }
}
