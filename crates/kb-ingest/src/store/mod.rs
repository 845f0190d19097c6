//! Item and chunk persistence

pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{EmbeddedChunk, KeywordStatus, KnowledgeBaseItem};

pub use sqlite::SqliteStore;

/// Persistence contract for knowledge-base items and their chunks
///
/// Status transitions happen through the `mark_*` methods so their side
/// effects (error clearing, sync stamping) live in one place. Each job
/// only touches rows scoped to its own item id and descendants, so the
/// store needs no cross-job locking.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a new item (children created by the fan-out processor)
    async fn create_item(&self, item: &KnowledgeBaseItem) -> Result<()>;

    /// Load an item; `NotFound` if it does not exist
    async fn get_item(&self, id: Uuid) -> Result<KnowledgeBaseItem>;

    /// Move an item into `processing`, clearing its previous error
    ///
    /// Conditional: returns `false` without touching the row when the
    /// item is already `processing` (the concurrent-reprocess guard).
    async fn mark_processing(&self, id: Uuid) -> Result<bool>;

    /// Move an item into `indexed`: clears the error, stamps last-synced
    async fn mark_indexed(&self, id: Uuid) -> Result<()>;

    /// Move an item into `failed`, recording the triggering error
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;

    /// Insert one batch of chunk records
    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Delete an item's chunks (full-replace reprocessing); returns count
    async fn delete_chunks(&self, item_id: Uuid) -> Result<usize>;

    /// Delete all child items of a parent, cascading to their chunks;
    /// returns the number of items removed
    async fn delete_children(&self, parent_id: Uuid) -> Result<usize>;

    /// List the child items of a parent
    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<KnowledgeBaseItem>>;

    /// Number of chunks currently stored for an item
    async fn count_chunks(&self, item_id: Uuid) -> Result<usize>;

    /// Stored chunk content for an item, in chunk-index order
    async fn chunk_contents(&self, item_id: Uuid) -> Result<Vec<String>>;

    /// Set the keyword extraction status
    async fn update_keyword_status(&self, id: Uuid, status: KeywordStatus) -> Result<()>;

    /// Store extracted keywords and mark the task completed
    async fn store_keywords(&self, id: Uuid, keywords: &[String]) -> Result<()>;
}
