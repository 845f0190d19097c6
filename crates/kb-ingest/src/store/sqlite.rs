//! SQLite implementation of the item/chunk store
//!
//! Single-node deployments run on this directly; larger installs put the
//! same contract over their relational store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    EmbeddedChunk, ItemKind, ItemStatus, KeywordStatus, KnowledgeBaseItem, SourcePayload,
};

use super::ItemStore;

/// SQLite-backed item/chunk store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::persistence(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (tests, ephemeral runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::persistence(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        // WAL mode for concurrent readers while a worker writes
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
        "#,
        )
        .map_err(|e| Error::persistence(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kb_items (
                id TEXT PRIMARY KEY,
                knowledge_base_id TEXT NOT NULL,
                parent_id TEXT,
                kind TEXT NOT NULL,
                source_json TEXT NOT NULL,
                chunk_size INTEGER,
                chunk_overlap INTEGER,
                status TEXT NOT NULL,
                last_error TEXT,
                keyword_status TEXT,
                keywords_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                last_synced_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_kb_items_kb ON kb_items(knowledge_base_id);
            CREATE INDEX IF NOT EXISTS idx_kb_items_parent ON kb_items(parent_id);
            CREATE INDEX IF NOT EXISTS idx_kb_items_status ON kb_items(status);

            CREATE TABLE IF NOT EXISTS kb_chunks (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL,
                knowledge_base_id TEXT NOT NULL,
                content TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_total INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                metadata_json TEXT,
                UNIQUE(item_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_kb_chunks_item ON kb_chunks(item_id);
            CREATE INDEX IF NOT EXISTS idx_kb_chunks_kb ON kb_chunks(knowledge_base_id);
        "#,
        )
        .map_err(|e| Error::persistence(format!("Failed to run migrations: {}", e)))?;

        Ok(())
    }
}

/// Pack an embedding vector as little-endian f32 bytes
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn parse_uuid(raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeBaseItem> {
    let source_json: String = row.get("source_json")?;
    let keywords_json: String = row.get("keywords_json")?;
    let kind_raw: String = row.get("kind")?;
    let status_raw: String = row.get("status")?;
    let keyword_status_raw: Option<String> = row.get("keyword_status")?;

    Ok(KnowledgeBaseItem {
        id: parse_uuid(row.get("id")?)?,
        knowledge_base_id: parse_uuid(row.get("knowledge_base_id")?)?,
        parent_id: row
            .get::<_, Option<String>>("parent_id")?
            .map(parse_uuid)
            .transpose()?,
        kind: ItemKind::from_str_opt(&kind_raw).unwrap_or(ItemKind::Text),
        source: serde_json::from_str::<SourcePayload>(&source_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        chunk_size: row
            .get::<_, Option<i64>>("chunk_size")?
            .map(|v| v as usize),
        chunk_overlap: row
            .get::<_, Option<i64>>("chunk_overlap")?
            .map(|v| v as usize),
        status: ItemStatus::from_str_opt(&status_raw).unwrap_or(ItemStatus::Pending),
        last_error: row.get("last_error")?,
        keyword_status: keyword_status_raw
            .as_deref()
            .and_then(KeywordStatus::from_str_opt),
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        created_at: parse_timestamp(row.get("created_at")?)?,
        last_synced_at: row
            .get::<_, Option<String>>("last_synced_at")?
            .map(parse_timestamp)
            .transpose()?,
    })
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn create_item(&self, item: &KnowledgeBaseItem) -> Result<()> {
        let source_json = serde_json::to_string(&item.source)?;
        let keywords_json = serde_json::to_string(&item.keywords)?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO kb_items (
                id, knowledge_base_id, parent_id, kind, source_json,
                chunk_size, chunk_overlap, status, last_error,
                keyword_status, keywords_json, created_at, last_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                item.id.to_string(),
                item.knowledge_base_id.to_string(),
                item.parent_id.map(|id| id.to_string()),
                item.kind.as_str(),
                source_json,
                item.chunk_size.map(|v| v as i64),
                item.chunk_overlap.map(|v| v as i64),
                item.status.as_str(),
                item.last_error,
                item.keyword_status.map(|s| s.as_str()),
                keywords_json,
                item.created_at.to_rfc3339(),
                item.last_synced_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| Error::persistence(format!("Failed to insert item: {}", e)))?;

        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> Result<KnowledgeBaseItem> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM kb_items WHERE id = ?1",
            params![id.to_string()],
            item_from_row,
        )
        .optional()
        .map_err(|e| Error::persistence(format!("Failed to load item: {}", e)))?
        .ok_or_else(|| Error::NotFound(format!("item {}", id)))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE kb_items SET status = 'processing', last_error = NULL \
                 WHERE id = ?1 AND status != 'processing'",
                params![id.to_string()],
            )
            .map_err(|e| Error::persistence(format!("Failed to mark processing: {}", e)))?;

        if changed > 0 {
            return Ok(true);
        }

        // Distinguish "already processing" from "missing"
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM kb_items WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| Error::persistence(format!("Failed to check item: {}", e)))?
            .unwrap_or(false);

        if exists {
            Ok(false)
        } else {
            Err(Error::NotFound(format!("item {}", id)))
        }
    }

    async fn mark_indexed(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE kb_items SET status = 'indexed', last_error = NULL, last_synced_at = ?2 \
                 WHERE id = ?1",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::persistence(format!("Failed to mark indexed: {}", e)))?;

        if changed == 0 {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE kb_items SET status = 'failed', last_error = ?2 WHERE id = ?1",
                params![id.to_string(), error],
            )
            .map_err(|e| Error::persistence(format!("Failed to mark failed: {}", e)))?;

        if changed == 0 {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::persistence(format!("Failed to open transaction: {}", e)))?;

        for chunk in chunks {
            let metadata_json = chunk
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            tx.execute(
                r#"
                INSERT INTO kb_chunks (
                    id, item_id, knowledge_base_id, content,
                    chunk_index, chunk_total, token_count, embedding, metadata_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    chunk.id.to_string(),
                    chunk.item_id.to_string(),
                    chunk.knowledge_base_id.to_string(),
                    chunk.content,
                    chunk.chunk_index,
                    chunk.chunk_total,
                    chunk.token_count,
                    vector_to_blob(&chunk.embedding),
                    metadata_json,
                ],
            )
            .map_err(|e| {
                Error::persistence(format!(
                    "Failed to insert chunk {} of item {}: {}",
                    chunk.chunk_index, chunk.item_id, e
                ))
            })?;
        }

        tx.commit()
            .map_err(|e| Error::persistence(format!("Failed to commit chunk batch: {}", e)))
    }

    async fn delete_chunks(&self, item_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kb_chunks WHERE item_id = ?1",
            params![item_id.to_string()],
        )
        .map_err(|e| Error::persistence(format!("Failed to delete chunks: {}", e)))
    }

    async fn delete_children(&self, parent_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kb_chunks WHERE item_id IN \
             (SELECT id FROM kb_items WHERE parent_id = ?1)",
            params![parent_id.to_string()],
        )
        .map_err(|e| Error::persistence(format!("Failed to delete child chunks: {}", e)))?;

        conn.execute(
            "DELETE FROM kb_items WHERE parent_id = ?1",
            params![parent_id.to_string()],
        )
        .map_err(|e| Error::persistence(format!("Failed to delete children: {}", e)))
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<KnowledgeBaseItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM kb_items WHERE parent_id = ?1 ORDER BY created_at")
            .map_err(|e| Error::persistence(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![parent_id.to_string()], item_from_row)
            .map_err(|e| Error::persistence(format!("Failed to list children: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::persistence(format!("Failed to read child row: {}", e)))
    }

    async fn count_chunks(&self, item_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM kb_chunks WHERE item_id = ?1",
            params![item_id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as usize)
        .map_err(|e| Error::persistence(format!("Failed to count chunks: {}", e)))
    }

    async fn chunk_contents(&self, item_id: Uuid) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT content FROM kb_chunks WHERE item_id = ?1 ORDER BY chunk_index")
            .map_err(|e| Error::persistence(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![item_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| Error::persistence(format!("Failed to read chunk contents: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::persistence(format!("Failed to read chunk row: {}", e)))
    }

    async fn update_keyword_status(&self, id: Uuid, status: KeywordStatus) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE kb_items SET keyword_status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )
            .map_err(|e| Error::persistence(format!("Failed to update keyword status: {}", e)))?;

        if changed == 0 {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }

    async fn store_keywords(&self, id: Uuid, keywords: &[String]) -> Result<()> {
        let keywords_json = serde_json::to_string(keywords)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE kb_items SET keywords_json = ?2, keyword_status = 'completed' \
                 WHERE id = ?1",
                params![id.to_string(), keywords_json],
            )
            .map_err(|e| Error::persistence(format!("Failed to store keywords: {}", e)))?;

        if changed == 0 {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn chunk_for(item: &KnowledgeBaseItem, index: u32, total: u32) -> EmbeddedChunk {
        EmbeddedChunk::new(
            item.id,
            item.knowledge_base_id,
            format!("chunk {}", index),
            index,
            total,
            12,
            vec![0.1, 0.2, 0.3],
        )
    }

    #[tokio::test]
    async fn item_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut item = KnowledgeBaseItem::from_url(Uuid::new_v4(), "https://x.test/page");
        item.chunk_size = Some(256);

        store.create_item(&item).await.unwrap();
        let loaded = store.get_item(item.id).await.unwrap();

        assert_eq!(loaded.id, item.id);
        assert_eq!(loaded.kind, ItemKind::Url);
        assert_eq!(loaded.chunk_size, Some(256));
        assert_eq!(loaded.status, ItemStatus::Pending);
        assert!(loaded.keyword_status.is_none());
        match loaded.source {
            SourcePayload::Url { url } => assert_eq!(url, "https://x.test/page"),
            other => panic!("wrong source: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.get_item(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_transitions_manage_error_and_sync_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content");
        store.create_item(&item).await.unwrap();

        store.mark_failed(item.id, "embedding exploded").await.unwrap();
        let failed = store.get_item(item.id).await.unwrap();
        assert_eq!(failed.status, ItemStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("embedding exploded"));

        // Re-entering processing clears the previous failure message
        assert!(store.mark_processing(item.id).await.unwrap());
        let processing = store.get_item(item.id).await.unwrap();
        assert_eq!(processing.status, ItemStatus::Processing);
        assert!(processing.last_error.is_none());

        store.mark_indexed(item.id).await.unwrap();
        let indexed = store.get_item(item.id).await.unwrap();
        assert_eq!(indexed.status, ItemStatus::Indexed);
        assert!(indexed.last_error.is_none());
        assert!(indexed.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn mark_processing_guards_concurrent_reprocessing() {
        let store = SqliteStore::in_memory().unwrap();
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content");
        store.create_item(&item).await.unwrap();

        assert!(store.mark_processing(item.id).await.unwrap());
        // Second claim loses while the first is still running
        assert!(!store.mark_processing(item.id).await.unwrap());

        assert!(matches!(
            store.mark_processing(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn chunks_round_trip_and_replace() {
        let store = SqliteStore::in_memory().unwrap();
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content");
        store.create_item(&item).await.unwrap();

        let chunks: Vec<_> = (0..3).map(|i| chunk_for(&item, i, 3)).collect();
        store.insert_chunks(&chunks).await.unwrap();
        assert_eq!(store.count_chunks(item.id).await.unwrap(), 3);
        assert_eq!(
            store.chunk_contents(item.id).await.unwrap(),
            vec!["chunk 0", "chunk 1", "chunk 2"]
        );

        assert_eq!(store.delete_chunks(item.id).await.unwrap(), 3);
        assert_eq!(store.count_chunks(item.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_chunk_index_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content");
        store.create_item(&item).await.unwrap();

        store
            .insert_chunks(&[chunk_for(&item, 0, 1)])
            .await
            .unwrap();
        let result = store.insert_chunks(&[chunk_for(&item, 0, 1)]).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
    }

    #[tokio::test]
    async fn delete_children_cascades_to_chunks() {
        let store = SqliteStore::in_memory().unwrap();
        let parent =
            KnowledgeBaseItem::feed_parent(Uuid::new_v4(), vec!["https://x.test/feed".into()]);
        store.create_item(&parent).await.unwrap();

        for i in 0..3 {
            let child = KnowledgeBaseItem::feed_child(
                &parent,
                crate::types::ListingRecord::new(format!("l-{i}"), "Listing"),
            );
            store.create_item(&child).await.unwrap();
            store
                .insert_chunks(&[chunk_for(&child, 0, 1)])
                .await
                .unwrap();
        }

        assert_eq!(store.list_children(parent.id).await.unwrap().len(), 3);
        assert_eq!(store.delete_children(parent.id).await.unwrap(), 3);
        assert!(store.list_children(parent.id).await.unwrap().is_empty());

        // Orphaned chunks are gone too
        let conn = store.conn.lock();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM kb_chunks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn keywords_update_and_complete() {
        let store = SqliteStore::in_memory().unwrap();
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content");
        store.create_item(&item).await.unwrap();

        store
            .update_keyword_status(item.id, KeywordStatus::Pending)
            .await
            .unwrap();
        store
            .store_keywords(item.id, &["Brightwater".to_string(), "Voxdesk".to_string()])
            .await
            .unwrap();

        let loaded = store.get_item(item.id).await.unwrap();
        assert_eq!(loaded.keyword_status, Some(KeywordStatus::Completed));
        assert_eq!(loaded.keywords, vec!["Brightwater", "Voxdesk"]);
    }

    #[test]
    fn embedding_blob_round_trip() {
        let vector = vec![0.5f32, -1.25, 3.75, f32::MIN_POSITIVE];
        assert_eq!(blob_to_vector(&vector_to_blob(&vector)), vector);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.db");

        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "durable content");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.create_item(&item).await.unwrap();
            store.mark_indexed(item.id).await.unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        let loaded = reopened.get_item(item.id).await.unwrap();
        assert_eq!(loaded.status, ItemStatus::Indexed);
    }
}
