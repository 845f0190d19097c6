//! Core types: knowledge-base items, chunks, and feed listings

pub mod chunk;
pub mod item;
pub mod listing;

pub use chunk::{ChunkMetadata, EmbeddedChunk};
pub use item::{ItemKind, ItemStatus, KeywordStatus, KnowledgeBaseItem, SourcePayload};
pub use listing::ListingRecord;
