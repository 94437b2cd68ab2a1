use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the document RAG server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory for runtime data.
    pub data_dir: PathBuf,
    /// Directory holding uploaded source documents.
    pub uploads_dir: PathBuf,
    /// Directory holding the persisted vector index and chunk metadata.
    pub index_dir: PathBuf,
    /// Maximum accepted upload size in megabytes.
    pub max_upload_mb: usize,
    /// Window size, in normalized characters, used by the chunker.
    pub chunk_size: usize,
    /// Overlap, in normalized characters, between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of results returned when a query does not specify `top_k`.
    pub top_k: usize,
    /// Minimum number of dense candidates fetched before rerank and dedupe.
    pub retrieve_candidates: usize,
    /// Whether queries rerank candidates unless they say otherwise.
    pub use_rerank: bool,
    /// Reranking backend used when reranking is requested.
    pub rerank_provider: RerankProvider,
    /// Base URL of the HTTP reranking service.
    pub rerank_url: Option<String>,
    /// Embedding backend used for both indexing and queries.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: Option<String>,
    /// Answer synthesis backend.
    pub answer_provider: AnswerProvider,
    /// Model used by the answer synthesis backend.
    pub answer_model: String,
    /// API key for the OpenAI answer backend.
    pub openai_api_key: Option<String>,
    /// Optional override of the OpenAI API base URL.
    pub openai_base_url: Option<String>,
    /// Cap on context blocks handed to answer synthesis.
    pub max_context_blocks: usize,
    /// Number of preceding chunks pulled in around each hit for answer context.
    pub neighbor_window: usize,
    /// Keep neighbor expansion on the hit's page.
    pub neighbor_same_page: bool,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic feature-hashing embeddings computed in process.
    Hash,
    /// Local Ollama runtime.
    Ollama,
}

/// Supported reranking backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RerankProvider {
    /// Deterministic query-term coverage scorer.
    Lexical,
    /// Remote cross-encoder exposed over HTTP.
    Http,
}

/// Supported answer synthesis backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerProvider {
    /// Answers are always extractive.
    None,
    /// OpenAI Responses API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(load_env_or("DOC_RAG_DATA_DIR", "data"));
        let uploads_dir = load_env_optional("DOC_RAG_UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));
        let index_dir = load_env_optional("DOC_RAG_INDEX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("index"));

        let legacy_openai = parse_optional::<bool>("RAG_USE_OPENAI")?.unwrap_or(false);
        let answer_provider = match load_env_optional("DOC_RAG_ANSWER_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("DOC_RAG_ANSWER_PROVIDER".into()))?,
            None if legacy_openai => AnswerProvider::OpenAI,
            None => AnswerProvider::None,
        };

        let config = Self {
            data_dir,
            uploads_dir,
            index_dir,
            max_upload_mb: parse_optional("DOC_RAG_MAX_UPLOAD_MB")?.unwrap_or(20),
            chunk_size: parse_optional("DOC_RAG_CHUNK_SIZE")?.unwrap_or(1100),
            chunk_overlap: parse_optional("DOC_RAG_CHUNK_OVERLAP")?.unwrap_or(180),
            top_k: parse_optional("DOC_RAG_TOP_K")?.unwrap_or(5),
            retrieve_candidates: parse_optional("DOC_RAG_RETRIEVE_CANDIDATES")?.unwrap_or(40),
            use_rerank: parse_optional("DOC_RAG_USE_RERANK")?.unwrap_or(false),
            rerank_provider: load_env_optional("DOC_RAG_RERANK_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("DOC_RAG_RERANK_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(RerankProvider::Lexical),
            rerank_url: load_env_optional("DOC_RAG_RERANK_URL"),
            embedding_provider: load_env_optional("DOC_RAG_EMBEDDING_PROVIDER")
                .map(|value| {
                    value.parse().map_err(|()| {
                        ConfigError::InvalidValue("DOC_RAG_EMBEDDING_PROVIDER".into())
                    })
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Hash),
            embedding_model: load_env_or(
                "DOC_RAG_EMBEDDING_MODEL",
                "paraphrase-multilingual-minilm",
            ),
            embedding_dimension: parse_optional("DOC_RAG_EMBEDDING_DIMENSION")?.unwrap_or(384),
            ollama_url: load_env_optional("OLLAMA_URL"),
            answer_provider,
            answer_model: load_env_or("OPENAI_MODEL", "gpt-4.1"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            max_context_blocks: parse_optional("DOC_RAG_MAX_CONTEXT_BLOCKS")?.unwrap_or(8),
            neighbor_window: parse_optional("DOC_RAG_NEIGHBOR_WINDOW")?.unwrap_or(1),
            neighbor_same_page: parse_optional("DOC_RAG_NEIGHBOR_SAME_PAGE")?.unwrap_or(true),
            server_port: parse_optional("SERVER_PORT")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("DOC_RAG_CHUNK_SIZE".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidValue("DOC_RAG_CHUNK_OVERLAP".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("DOC_RAG_EMBEDDING_DIMENSION".into()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidValue("DOC_RAG_TOP_K".into()));
        }
        if self.rerank_provider == RerankProvider::Http && self.rerank_url.is_none() {
            return Err(ConfigError::MissingVariable("DOC_RAG_RERANK_URL".into()));
        }
        Ok(())
    }

    /// Configuration rooted at `data_dir` with every other setting at its default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            uploads_dir: data_dir.join("uploads"),
            index_dir: data_dir.join("index"),
            data_dir,
            max_upload_mb: 20,
            chunk_size: 1100,
            chunk_overlap: 180,
            top_k: 5,
            retrieve_candidates: 40,
            use_rerank: false,
            rerank_provider: RerankProvider::Lexical,
            rerank_url: None,
            embedding_provider: EmbeddingProvider::Hash,
            embedding_model: "paraphrase-multilingual-minilm".into(),
            embedding_dimension: 384,
            ollama_url: None,
            answer_provider: AnswerProvider::None,
            answer_model: "gpt-4.1".into(),
            openai_api_key: None,
            openai_base_url: None,
            max_context_blocks: 8,
            neighbor_window: 1,
            neighbor_same_page: true,
            server_port: None,
        }
    }
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .to_lowercase()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for RerankProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lexical" => Ok(Self::Lexical),
            "http" => Ok(Self::Http),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for AnswerProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        uploads_dir = %config.uploads_dir.display(),
        index_dir = %config.index_dir.display(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        embedding_provider = ?config.embedding_provider,
        answer_provider = ?config.answer_provider,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
