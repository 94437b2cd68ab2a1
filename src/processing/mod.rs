//! Retrieval pipeline: chunking, indexing, search, intent planning, and answer composition.

pub mod answer;
pub mod chunking;
pub mod context;
pub mod indexer;
pub mod intent;
pub mod retriever;
pub mod sanitize;
mod service;
pub mod types;

pub use service::{DocRagApi, DocRagService};
pub use types::{
    AnswerMode, AnswerStyle, Chunk, ChunkingError, Citation, IndexError, IndexOutcome, IntentPlan,
    QueryOutcome, QueryRequest, RetrievalError, RetrievalResult, SearchParams, ServiceError,
    ServiceInitError, UploadError, UploadOutcome,
};
