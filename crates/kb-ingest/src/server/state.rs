//! Application state for the ingestion service

use std::sync::Arc;

use crate::config::KbConfig;
use crate::error::Result;
use crate::ingestion::TextExtractor;
use crate::processing::{
    FeedProcessor, IngestWorker, ItemProcessor, JobQueue, KeywordExtractor, KeywordWorker,
};
use crate::providers::{
    ChatLlmClient, EmbeddingProvider, HttpEmbedder, HttpListingFeed, LlmProvider, ListingFeed,
    PageScraper, RenderScraper,
};
use crate::store::{ItemStore, SqliteStore};

/// Shared application state
///
/// Every external client is constructed once here and injected into the
/// processors; nothing in the pipeline reaches for a global.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: KbConfig,
    store: Arc<dyn ItemStore>,
    queue: JobQueue,
}

impl AppState {
    /// Create state over the configured SQLite store and start the workers
    pub async fn new(config: KbConfig) -> Result<Self> {
        if let Some(parent) = config.store.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store: Arc<dyn ItemStore> = Arc::new(SqliteStore::new(&config.store.db_path)?);
        tracing::info!("Item store opened at {}", config.store.db_path.display());

        Self::with_store(config, store).await
    }

    /// Wire providers, processors, and worker pools over an existing store
    pub async fn with_store(config: KbConfig, store: Arc<dyn ItemStore>) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbedder::new(&config.embeddings)?);
        let scraper: Arc<dyn PageScraper> = Arc::new(RenderScraper::new(&config.scrape)?);
        let feed: Arc<dyn ListingFeed> = Arc::new(HttpListingFeed::new(&config.feed)?);
        let llm: Arc<dyn LlmProvider> = Arc::new(ChatLlmClient::new(&config.llm)?);
        tracing::info!(
            "Providers initialized (embeddings: {} dims, scrape: {}, llm: {})",
            embedder.dimensions(),
            scraper.name(),
            llm.name()
        );

        let extractor = Arc::new(TextExtractor::new(scraper, &config.scrape)?);
        let processor = Arc::new(ItemProcessor::new(
            store.clone(),
            extractor,
            embedder,
            config.embeddings.max_attempts,
            config.processing.clone(),
        ));
        let fanout = Arc::new(FeedProcessor::new(
            store.clone(),
            feed,
            processor.clone(),
            config.feed.max_attempts,
        ));
        let keywords = Arc::new(KeywordExtractor::new(
            store.clone(),
            llm,
            config.llm.max_attempts,
        ));

        let (queue, ingest_rx, keyword_rx) = JobQueue::new(
            config.processing.ingest_concurrency,
            config.processing.keyword_concurrency,
        );

        let ingest_worker = IngestWorker::new(store.clone(), processor, fanout, &queue);
        tokio::spawn(ingest_worker.run(ingest_rx));

        let keyword_worker = KeywordWorker::new(keywords, &queue);
        tokio::spawn(keyword_worker.run(keyword_rx));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                queue,
            }),
        })
    }

    pub fn config(&self) -> &KbConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.inner.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }
}
