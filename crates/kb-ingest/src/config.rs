//! Configuration for the ingestion service

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main ingestion service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbConfig {
    /// HTTP facade configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Item/chunk store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Chunking defaults
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Embedding service configuration
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    /// Page scrape service configuration
    #[serde(default)]
    pub scrape: ScrapeConfig,
    /// Bulk listing feed configuration
    #[serde(default)]
    pub feed: FeedConfig,
    /// LLM configuration (keyword extraction)
    #[serde(default)]
    pub llm: LlmConfig,
    /// Queue and batching knobs
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl KbConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| {
            Error::InvalidConfiguration(format!(
                "Failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }
}

/// HTTP facade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            enable_cors: true,
        }
    }
}

/// Item/chunk store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/kb-ingest.db"),
        }
    }
}

/// Chunking defaults, used when an item carries no override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Chunk size in tokens
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in tokens
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service
    pub base_url: String,
    /// Model name sent with each request
    pub model: String,
    /// Vector dimensionality the service produces
    pub dimensions: usize,
    /// API key; empty disables the Authorization header
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    /// Retry attempts per chunk (in-call policy)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key: String::new(),
            timeout_secs: default_embed_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Page scrape service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Base URL of the rendering scrape service
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Timeout for both the rich scrape and the basic fallback fetch,
    /// in seconds; kept inside the 30-60s window
    #[serde(default = "default_scrape_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_scrape_timeout() -> u64 {
    45
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.scrape.voxdesk.dev".to_string(),
            api_key: String::new(),
            timeout_secs: default_scrape_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Bulk listing feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the bulk listing scraper
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Listings requested per page
    #[serde(default = "default_feed_page_size")]
    pub page_size: usize,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_feed_page_size() -> usize {
    100
}

fn default_feed_timeout() -> u64 {
    60
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.listings.voxdesk.dev".to_string(),
            api_key: String::new(),
            page_size: default_feed_page_size(),
            timeout_secs: default_feed_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// LLM configuration for the keyword extraction task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Task-level attempts, distinct from in-call retries
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            temperature: default_llm_temperature(),
            timeout_secs: default_llm_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Queue concurrency and batching knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Concurrent ingestion jobs
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
    /// Concurrent keyword extraction jobs
    #[serde(default = "default_keyword_concurrency")]
    pub keyword_concurrency: usize,
    /// Embedding calls in flight per item (never unbounded)
    pub embed_concurrency: Option<usize>,
    /// Chunks per store insert for url/text items
    #[serde(default = "default_persist_batch")]
    pub persist_batch_size: usize,
    /// Smaller batch for feed children, where listing metadata makes rows heavy
    #[serde(default = "default_feed_persist_batch")]
    pub feed_persist_batch_size: usize,
    /// Pause between batches to stay under upstream rate limits, in ms
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,
}

fn default_ingest_concurrency() -> usize {
    2
}

fn default_keyword_concurrency() -> usize {
    5
}

fn default_persist_batch() -> usize {
    50
}

fn default_feed_persist_batch() -> usize {
    10
}

fn default_inter_batch_delay() -> u64 {
    200
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            ingest_concurrency: default_ingest_concurrency(),
            keyword_concurrency: default_keyword_concurrency(),
            embed_concurrency: None,
            persist_batch_size: default_persist_batch(),
            feed_persist_batch_size: default_feed_persist_batch(),
            inter_batch_delay_ms: default_inter_batch_delay(),
        }
    }
}

impl ProcessingConfig {
    /// Embedding concurrency, auto-detected from CPU count when unset
    pub fn effective_embed_concurrency(&self) -> usize {
        self.embed_concurrency
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }
}
