//! Memory-bounded batch persistence of embedded chunks

use std::sync::Arc;

use crate::error::Result;
use crate::store::ItemStore;
use crate::types::EmbeddedChunk;

/// Writes chunk records in fixed-size batches, never holding more than one
/// batch's worth of work in a single store call
///
/// Batches are written sequentially and in order; the first failing batch
/// aborts the rest. Already-written batches stay in place: the owning
/// item's status never reaches `indexed` until every batch lands, and a
/// reprocessing pass deletes and rewrites from scratch.
pub struct BatchPersister {
    store: Arc<dyn ItemStore>,
    batch_size: usize,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn ItemStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Persist `chunks`, consuming them batch by batch; returns the number
    /// of chunks written
    pub async fn persist(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        let total = chunks.len();
        let mut written = 0usize;

        let mut remaining = chunks;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(self.batch_size));
            let batch = remaining;
            let batch_len = batch.len();

            self.store.insert_chunks(&batch).await?;
            drop(batch);

            written += batch_len;
            tracing::debug!("Persisted chunk batch ({}/{} chunks)", written, total);
            remaining = rest;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::Error;
    use crate::types::{KeywordStatus, KnowledgeBaseItem};

    use super::*;

    /// Store stub that records batch sizes and can fail on a chosen batch
    struct RecordingStore {
        batches: parking_lot::Mutex<Vec<usize>>,
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl RecordingStore {
        fn new(fail_on_call: Option<usize>) -> Self {
            Self {
                batches: parking_lot::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail_on_call,
            }
        }
    }

    #[async_trait]
    impl ItemStore for RecordingStore {
        async fn create_item(&self, _item: &KnowledgeBaseItem) -> Result<()> {
            unreachable!()
        }
        async fn get_item(&self, _id: Uuid) -> Result<KnowledgeBaseItem> {
            unreachable!()
        }
        async fn mark_processing(&self, _id: Uuid) -> Result<bool> {
            unreachable!()
        }
        async fn mark_indexed(&self, _id: Uuid) -> Result<()> {
            unreachable!()
        }
        async fn mark_failed(&self, _id: Uuid, _error: &str) -> Result<()> {
            unreachable!()
        }
        async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_call == Some(call) {
                return Err(Error::persistence("disk full"));
            }
            self.batches.lock().push(chunks.len());
            Ok(())
        }
        async fn delete_chunks(&self, _item_id: Uuid) -> Result<usize> {
            unreachable!()
        }
        async fn delete_children(&self, _parent_id: Uuid) -> Result<usize> {
            unreachable!()
        }
        async fn list_children(&self, _parent_id: Uuid) -> Result<Vec<KnowledgeBaseItem>> {
            unreachable!()
        }
        async fn count_chunks(&self, _item_id: Uuid) -> Result<usize> {
            unreachable!()
        }
        async fn chunk_contents(&self, _item_id: Uuid) -> Result<Vec<String>> {
            unreachable!()
        }
        async fn update_keyword_status(&self, _id: Uuid, _status: KeywordStatus) -> Result<()> {
            unreachable!()
        }
        async fn store_keywords(&self, _id: Uuid, _keywords: &[String]) -> Result<()> {
            unreachable!()
        }
    }

    fn chunks(n: usize) -> Vec<EmbeddedChunk> {
        let item = Uuid::new_v4();
        let kb = Uuid::new_v4();
        (0..n)
            .map(|i| {
                EmbeddedChunk::new(
                    item,
                    kb,
                    format!("c{i}"),
                    i as u32,
                    n as u32,
                    1,
                    vec![0.0],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn groups_into_ordered_batches() {
        let store = Arc::new(RecordingStore::new(None));
        let persister = BatchPersister::new(store.clone(), 50);

        let written = persister.persist(chunks(125)).await.unwrap();
        assert_eq!(written, 125);
        assert_eq!(*store.batches.lock(), vec![50, 50, 25]);
    }

    #[tokio::test]
    async fn aborts_on_first_failing_batch() {
        let store = Arc::new(RecordingStore::new(Some(2)));
        let persister = BatchPersister::new(store.clone(), 10);

        let result = persister.persist(chunks(30)).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
        // First batch landed, nothing after the failure was attempted
        assert_eq!(*store.batches.lock(), vec![10]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_input_writes_nothing() {
        let store = Arc::new(RecordingStore::new(None));
        let persister = BatchPersister::new(store.clone(), 10);
        assert_eq!(persister.persist(Vec::new()).await.unwrap(), 0);
        assert!(store.batches.lock().is_empty());
    }
}
