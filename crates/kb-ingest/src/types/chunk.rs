//! Embedded chunk records ready for storage

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::listing::ListingRecord;

/// Metadata carried alongside a chunk
///
/// Feed children keep their full structured source record here; anything
/// else dynamic falls back to an opaque JSON value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChunkMetadata {
    Listing(ListingRecord),
    Opaque(serde_json::Value),
}

/// A contiguous span of an item's extracted text, with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// Unique chunk ID
    pub id: Uuid,
    /// Parent item
    pub item_id: Uuid,
    /// Denormalized from the parent for fast knowledge-base lookups
    pub knowledge_base_id: Uuid,
    pub content: String,
    /// Zero-based position within the item's chunk set
    pub chunk_index: u32,
    /// Size of the chunk set; shared by every chunk of one item
    pub chunk_total: u32,
    pub token_count: u32,
    /// Fixed-dimensionality vector from the embedding service
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

impl EmbeddedChunk {
    pub fn new(
        item_id: Uuid,
        knowledge_base_id: Uuid,
        content: String,
        chunk_index: u32,
        chunk_total: u32,
        token_count: u32,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            knowledge_base_id,
            content,
            chunk_index,
            chunk_total,
            token_count,
            embedding,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
