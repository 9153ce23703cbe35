//! Configuration management for the document agent.
//!
//! Configuration is read from environment variables (a `.env` file is loaded
//! first by the binary):
//! - `GOOGLE_API_KEY` - Required. Key for the Gemini chat and embedding APIs.
//! - `CHAT_MODEL` - Optional. Chat model. Defaults to `gemini-2.5-pro`.
//! - `EMBED_MODEL` - Optional. Embedding model. Defaults to `gemini-embedding-001`.
//! - `EMBED_DIMENSION` - Optional. Dense vector size. Defaults to `3072`.
//! - `MISTRAL_API_KEY` - Optional. Key for the hosted OCR model. Uploads fail without it.
//! - `OCR_MODEL` - Optional. Defaults to `mistral-ocr-latest`.
//! - `QDRANT_URL` - Optional. Defaults to `http://localhost:6333`.
//! - `QDRANT_API_KEY` - Optional.
//! - `QDRANT_COLLECTION` - Optional. Defaults to `my_documents`.
//! - `INGEST_MODE` - Optional. `upsert` (default) or `recreate`.
//! - `CHUNK_OVERLAP` - Optional. Characters borrowed from neighbour pages. Defaults to `500`.
//! - `RETRIEVAL_TOP_K` - Optional. Passages per retrieval. Defaults to `8`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_ITERATIONS` - Optional. Agent/tool round-trip cap. Defaults to `8`.
//! - `MODEL_TIMEOUT_SECS`, `TOOL_TIMEOUT_SECS`, `RUN_TIMEOUT_SECS` - Optional deadlines.
//! - `CORS_ORIGINS` - Optional. Comma separated. Defaults to `http://localhost:5173`.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// How an upload writes into the vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Create the collection if missing and replace only the uploaded document's chunks.
    Upsert,
    /// Drop and re-create the whole collection on every upload (legacy, single-document).
    Recreate,
}

impl FromStr for IngestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upsert" => Ok(IngestMode::Upsert),
            "recreate" => Ok(IngestMode::Recreate),
            other => Err(format!("expected `upsert` or `recreate`, got: {}", other)),
        }
    }
}

/// Vector index and retrieval configuration.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Qdrant base URL
    pub qdrant_url: String,

    /// Qdrant API key (cloud deployments)
    pub qdrant_api_key: Option<String>,

    /// Collection holding the document chunks
    pub collection: String,

    /// Dense embedding model
    pub embed_model: String,

    /// Embedding dimension (must match model output)
    pub embed_dimension: usize,

    /// Write policy used by ingestion
    pub ingest_mode: IngestMode,

    /// Characters of neighbouring pages folded into each page chunk
    pub chunk_overlap: usize,

    /// Passages returned per retrieval
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            collection: "my_documents".to_string(),
            embed_model: "gemini-embedding-001".to_string(),
            embed_dimension: 3072,
            ingest_mode: IngestMode::Upsert,
            chunk_overlap: 500,
            top_k: 8,
        }
    }
}

/// Deadlines attached to external calls and to a whole agent run.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub model: Duration,
    pub tool: Duration,
    pub run: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            model: Duration::from_secs(120),
            tool: Duration::from_secs(60),
            run: Duration::from_secs(300),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key
    pub api_key: String,

    /// Chat model identifier
    pub chat_model: String,

    /// Mistral OCR API key
    pub ocr_api_key: Option<String>,

    /// OCR model identifier
    pub ocr_model: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum agent/tool round trips per conversation turn
    pub max_iterations: usize,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,

    pub timeouts: Timeouts,

    /// Vector index configuration
    pub index: IndexConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GOOGLE_API_KEY` is not set, and
    /// `ConfigError::InvalidValue` for any variable that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("GOOGLE_API_KEY".to_string()))?;

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.5-pro".to_string());

        let ocr_api_key = std::env::var("MISTRAL_API_KEY").ok().filter(|k| !k.is_empty());
        let ocr_model =
            std::env::var("OCR_MODEL").unwrap_or_else(|_| "mistral-ocr-latest".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_parse("PORT", 8000u16)?;

        let max_iterations = env_parse("MAX_ITERATIONS", 8usize)?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let timeouts = Timeouts {
            model: Duration::from_secs(env_parse("MODEL_TIMEOUT_SECS", 120u64)?),
            tool: Duration::from_secs(env_parse("TOOL_TIMEOUT_SECS", 60u64)?),
            run: Duration::from_secs(env_parse("RUN_TIMEOUT_SECS", 300u64)?),
        };

        let defaults = IndexConfig::default();
        let index = IndexConfig {
            qdrant_url: std::env::var("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_api_key: std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty()),
            collection: std::env::var("QDRANT_COLLECTION").unwrap_or(defaults.collection),
            embed_model: std::env::var("EMBED_MODEL").unwrap_or(defaults.embed_model),
            embed_dimension: env_parse("EMBED_DIMENSION", defaults.embed_dimension)?,
            ingest_mode: std::env::var("INGEST_MODE")
                .ok()
                .map(|v| {
                    v.parse::<IngestMode>()
                        .map_err(|e| ConfigError::InvalidValue("INGEST_MODE".to_string(), e))
                })
                .transpose()?
                .unwrap_or(defaults.ingest_mode),
            chunk_overlap: env_parse("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            top_k: env_parse("RETRIEVAL_TOP_K", defaults.top_k)?,
        };

        Ok(Self {
            api_key,
            chat_model,
            ocr_api_key,
            ocr_model,
            host,
            port,
            max_iterations,
            cors_origins,
            timeouts,
            index,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            chat_model: "gemini-2.5-pro".to_string(),
            ocr_api_key: None,
            ocr_model: "mistral-ocr-latest".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_iterations: 8,
            cors_origins: vec!["http://localhost:5173".to_string()],
            timeouts: Timeouts::default(),
            index: IndexConfig::default(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}
