//! thaidoc-rag - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes upload and conversation endpoints.

use thaidoc_rag::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real environment variables still apply.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thaidoc_rag=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config = Config::from_env()?;
    info!("Starting server on {}:{}", config.host, config.port);

    api::serve(config).await?;

    Ok(())
}
