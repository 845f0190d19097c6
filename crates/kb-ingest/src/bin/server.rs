//! Ingestion server binary
//!
//! Run with: cargo run -p kb-ingest --bin kb-ingest-server

use kb_ingest::{config::KbConfig, server::KbServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kb_ingest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Config file path from the environment, falling back to defaults
    let config = match std::env::var("KB_INGEST_CONFIG") {
        Ok(path) => {
            tracing::info!("Loading configuration from {}", path);
            KbConfig::from_file(&path)?
        }
        Err(_) => KbConfig::default(),
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Embedding model: {}", config.embeddings.model);
    tracing::info!("  - Embedding dimensions: {}", config.embeddings.dimensions);
    tracing::info!("  - Chunk size/overlap: {}/{}", config.chunking.chunk_size, config.chunking.chunk_overlap);
    tracing::info!(
        "  - Concurrency: {} ingest / {} keyword jobs",
        config.processing.ingest_concurrency,
        config.processing.keyword_concurrency
    );

    let server = KbServer::new(config).await?;

    println!("\nIngestion server starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/items/:id/process   - Queue item ingestion");
    println!("  POST /api/items/:id/keywords  - Queue keyword extraction");
    println!("  GET  /api/items/:id           - Poll item status");
    println!("  GET  /api/queue               - Queue statistics");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
