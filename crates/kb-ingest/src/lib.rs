//! kb-ingest: knowledge-base ingestion pipeline for voice agent dashboards
//!
//! Takes heterogeneous source items (web pages, raw text, bulk listing
//! feeds) and turns them into chunked, vector-embedded documents ready for
//! storage, with an explicit item status machine, rate-limit-aware retry,
//! partial-failure-tolerant feed fan-out, and an independent keyword
//! extraction task.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod store;
pub mod types;

pub use config::KbConfig;
pub use error::{Error, Result};
pub use types::{
    chunk::{ChunkMetadata, EmbeddedChunk},
    item::{ItemKind, ItemStatus, KeywordStatus, KnowledgeBaseItem},
    listing::ListingRecord,
};
