//! Answer synthesis backends.
//!
//! Synthesis is optional. When no provider is configured, or a provider call fails, the query
//! pipeline answers extractively from the top results instead, so an LLM outage never fails a
//! query. Both adapters issue HTTP requests directly with `reqwest`.

use crate::config::{AnswerProvider, Config};
use crate::processing::AnswerStyle;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum AnswerClientError {
    /// Provider is misconfigured or unreachable.
    #[error("Answer provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed or held no text.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Everything a backend needs to write an answer.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    /// User question.
    pub question: String,
    /// Rendered context blocks, each starting with its `[source | anchor]` citation.
    pub context_blocks: Vec<String>,
    /// Style selected by the intent planner.
    pub style: AnswerStyle,
}

impl AnswerRequest {
    /// System instructions for the configured style.
    pub fn instructions(&self) -> String {
        let mut instructions = String::from(
            "Answer formally and only with information from the context. \
             If the context is insufficient, say so. \
             Cite passages exactly as they appear, in square brackets.",
        );
        if self.style == AnswerStyle::ObjectivesConclusions {
            instructions.push_str(
                " Focus on the stated objectives, contributions, and conclusions or findings; \
                 list them separately when the documents state them.",
            );
        }
        instructions
    }

    /// User input combining context and question.
    pub fn input(&self) -> String {
        format!(
            "CONTEXT:\n{}\n\nQUESTION:\n{}",
            self.context_blocks.join("\n\n"),
            self.question
        )
    }
}

/// Interface implemented by answer synthesis backends.
#[async_trait]
pub trait AnswerClient: Send + Sync {
    /// Short provider name used in logs.
    fn provider(&self) -> &'static str;

    /// Write an answer grounded in the request's context.
    async fn generate_answer(&self, request: &AnswerRequest) -> Result<String, AnswerClientError>;
}

/// Build the answer client selected by configuration, or `None` for extractive-only answers.
pub fn build_answer_client(
    config: &Config,
) -> Result<Option<Arc<dyn AnswerClient>>, AnswerClientError> {
    match config.answer_provider {
        AnswerProvider::None => Ok(None),
        AnswerProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                AnswerClientError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            let base_url = config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
            Ok(Some(Arc::new(OpenAiAnswerClient::new(
                base_url,
                api_key,
                config.answer_model.clone(),
            )?)))
        }
        AnswerProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Some(Arc::new(OllamaAnswerClient::new(
                base_url,
                config.answer_model.clone(),
            )?)))
        }
    }
}

fn http_client(agent: &str) -> Result<Client, AnswerClientError> {
    Client::builder()
        .user_agent(agent)
        .build()
        .map_err(|error| AnswerClientError::ProviderUnavailable(error.to_string()))
}

/// OpenAI Responses API adapter.
pub struct OpenAiAnswerClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiAnswerClient {
    /// Build an adapter for `base_url` authenticating with `api_key`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AnswerClientError> {
        Ok(Self {
            http: http_client("doc-rag/answer")?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/responses", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<ResponsesItem>,
}

#[derive(Debug, Deserialize)]
struct ResponsesItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ResponsesContent>,
}

#[derive(Debug, Deserialize)]
struct ResponsesContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponsesBody {
    fn text(self) -> String {
        if let Some(text) = self.output_text.filter(|text| !text.trim().is_empty()) {
            return text.trim().to_string();
        }
        self.output
            .into_iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content)
            .filter(|content| content.kind == "output_text" && !content.text.is_empty())
            .map(|content| content.text)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

#[async_trait]
impl AnswerClient for OpenAiAnswerClient {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn generate_answer(&self, request: &AnswerRequest) -> Result<String, AnswerClientError> {
        let payload = json!({
            "model": self.model,
            "instructions": request.instructions(),
            "input": request.input(),
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                AnswerClientError::ProviderUnavailable(format!(
                    "failed to reach OpenAI at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnswerClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: ResponsesBody = response.json().await.map_err(|error| {
            AnswerClientError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;
        let text = body.text();
        if text.is_empty() {
            return Err(AnswerClientError::InvalidResponse(
                "OpenAI response contained no text".into(),
            ));
        }
        Ok(text)
    }
}

/// Ollama `/api/generate` adapter.
pub struct OllamaAnswerClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaAnswerClient {
    /// Build an adapter for the Ollama runtime at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, AnswerClientError> {
        Ok(Self {
            http: http_client("doc-rag/answer")?,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl AnswerClient for OllamaAnswerClient {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    async fn generate_answer(&self, request: &AnswerRequest) -> Result<String, AnswerClientError> {
        let payload = json!({
            "model": self.model,
            "system": request.instructions(),
            "prompt": request.input(),
            "stream": false,
            "options": {
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                AnswerClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AnswerClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnswerClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            AnswerClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        if !body.done {
            return Err(AnswerClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }
        let text = body.response.trim();
        if text.is_empty() {
            return Err(AnswerClientError::InvalidResponse(
                "Ollama response contained no text".into(),
            ));
        }
        Ok(text.to_string())
    }
}
