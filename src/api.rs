//! HTTP surface for the document RAG service.
//!
//! - `GET /health` – Liveness probe.
//! - `POST /documents/upload?filename=<name>` – Store a PDF, Markdown, or text file sent as the
//!   raw request body. Returns `{doc_id, stored_filename, original_filename}`.
//! - `POST /documents/reindex` – Rebuild the index from every stored document.
//! - `POST /query` – Retrieve passages for a question and answer it, with citations.
//! - `GET /metrics` – Rebuild and query counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools.

use crate::metrics::MetricsSnapshot;
use crate::processing::{
    DocRagApi, QueryOutcome, QueryRequest, ServiceError, UploadError, UploadOutcome,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router over `service`.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: DocRagApi + 'static,
{
    let body_limit = service.max_upload_bytes();
    Router::new()
        .route("/health", get(health))
        .route("/documents/upload", post(upload_document::<S>))
        .route("/documents/reindex", post(reindex::<S>))
        .route("/query", post(query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Query string for `POST /documents/upload`.
#[derive(Deserialize)]
struct UploadParams {
    /// Client-side filename; decides the document type.
    filename: String,
}

/// Store an uploaded document. The body is the raw file.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<UploadOutcome>, AppError>
where
    S: DocRagApi,
{
    let outcome = service
        .upload_document(&params.filename, body.to_vec())
        .await?;
    tracing::info!(
        doc_id = %outcome.doc_id,
        stored = %outcome.stored_filename,
        "Upload request completed"
    );
    Ok(Json(outcome))
}

/// Response body for `POST /documents/reindex`.
#[derive(Serialize)]
struct ReindexResponse {
    indexed_documents: usize,
    indexed_chunks: usize,
}

async fn reindex<S>(State(service): State<Arc<S>>) -> Result<Json<ReindexResponse>, AppError>
where
    S: DocRagApi,
{
    let outcome = service.reindex().await?;
    Ok(Json(ReindexResponse {
        indexed_documents: outcome.document_count,
        indexed_chunks: outcome.chunk_count,
    }))
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
struct QueryBody {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    use_llm: Option<bool>,
    #[serde(default)]
    use_rerank: Option<bool>,
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    source_filename: Option<String>,
}

async fn query<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryOutcome>, AppError>
where
    S: DocRagApi,
{
    let request = QueryRequest {
        question: body.question,
        top_k: body.top_k,
        use_llm: body.use_llm,
        use_rerank: body.use_rerank,
        doc_id: body.doc_id,
        source_filename: body.source_filename,
    };
    Ok(Json(service.query(request).await?))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: DocRagApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/documents/upload?filename=<name>",
                description: "Store a PDF, Markdown, or text document sent as the raw body. Run reindex afterwards to make it searchable.",
                request_example: None,
            },
            CommandDescriptor {
                name: "reindex",
                method: "POST",
                path: "/documents/reindex",
                description: "Rebuild the vector index and chunk metadata from every stored document.",
                request_example: None,
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Retrieve cited passages for a question and answer it, extractively when no answer backend is available.",
                request_example: Some(json!({
                    "question": "What are the main conclusions?",
                    "top_k": 5,
                    "use_llm": false,
                    "use_rerank": true,
                    "source_filename": "optional-stored-filename.pdf"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return rebuild and query counters.",
                request_example: None,
            },
        ],
    })
}

struct AppError(ServiceError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Upload(_) | ServiceError::EmptyQuestion => StatusCode::BAD_REQUEST,
            error if error.is_index_not_ready() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}
