#![deny(missing_docs)]

//! Core library for the doc-rag retrieval server.

/// Answer synthesis backends.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text extraction from uploaded documents.
pub mod extract;
/// Structured logging and tracing setup.
pub mod logging;
/// Rebuild and query metrics helpers.
pub mod metrics;
/// Chunking, indexing, retrieval, and answer composition.
pub mod processing;
/// Second-stage reranking backends.
pub mod rerank;
/// Persisted vector index and chunk metadata.
pub mod store;
