//! Router, shared state and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::{Agent, AgentSettings};
use crate::config::Config;
use crate::jobs::JobStore;
use crate::llm::{GeminiClient, LlmClient};
use crate::rag::{
    GeminiEmbedder, HybridRetriever, IngestOptions, Ingestor, MistralOcr, OcrService, QdrantStore,
};
use crate::tools::{PassageSearch, ToolRegistry};

use super::conversation;
use super::types::HealthResponse;
use super::upload;

/// Uploaded PDFs can be far larger than axum's 2 MiB default.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub agent: Agent,
    pub ingestor: Arc<Ingestor>,
    pub jobs: JobStore,
}

impl AppState {
    /// Assemble state from its seams; used by [`serve`] and by tests.
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn PassageSearch>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::for_documents(search, config.index.top_k));
        let agent = Agent::new(AgentSettings::from(&config), llm, tools);
        Self {
            config,
            agent,
            ingestor,
            jobs: JobStore::new(),
        }
    }

    /// Wire the production clients: Gemini chat and embeddings, Qdrant and Mistral OCR.
    pub fn from_config(config: Config) -> Self {
        let gemini = GeminiClient::new(config.api_key.clone(), config.timeouts.model);
        let embedder = Arc::new(GeminiEmbedder::new(
            gemini.clone(),
            config.index.embed_model.clone(),
            config.index.embed_dimension,
        ));
        let store = Arc::new(QdrantStore::new(
            &config.index.qdrant_url,
            config.index.qdrant_api_key.clone(),
            config.index.collection.clone(),
            config.index.embed_dimension,
            config.timeouts.tool,
        ));

        let ocr = config.ocr_api_key.clone().map(|key| {
            Arc::new(MistralOcr::new(
                key,
                config.ocr_model.clone(),
                config.timeouts.run,
            )) as Arc<dyn OcrService>
        });
        if ocr.is_none() {
            tracing::warn!("MISTRAL_API_KEY not set; uploads will fail until it is configured");
        }

        let ingestor = Arc::new(Ingestor::new(
            ocr,
            embedder.clone(),
            store.clone(),
            IngestOptions {
                mode: config.index.ingest_mode,
                overlap: config.index.chunk_overlap,
                dimension: config.index.embed_dimension,
            },
        ));
        let search = Arc::new(HybridRetriever::new(embedder, store));

        Self::new(config, Arc::new(gemini), search, ingestor)
    }
}

/// Build the router with CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(%origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(origins)
    };

    Router::new()
        .route("/health", get(health))
        .route("/conversation", post(conversation::conversation))
        .route("/upload", post(upload::upload))
        .route("/status", get(upload::get_status))
        .route("/status/reset", post(upload::reset_status))
        .route("/jobs/:id", get(upload::get_job))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(
        model = %config.chat_model,
        collection = %config.index.collection,
        mode = ?config.index.ingest_mode,
        max_iterations = config.max_iterations,
        "Loaded configuration"
    );

    let state = Arc::new(AppState::from_config(config));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
