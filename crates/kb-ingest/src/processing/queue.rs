//! Job queue and worker pools for background processing
//!
//! Two queues: ingestion and keyword extraction, each drained by a
//! semaphore-limited worker pool. Submission is fire-and-forget; callers
//! poll item status through the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::ItemStore;
use crate::types::ItemKind;

use super::fanout::FeedProcessor;
use super::keywords::KeywordExtractor;
use super::processor::ItemProcessor;

const QUEUE_CAPACITY: usize = 1000;

#[derive(Default)]
struct QueueCounters {
    ingest_submitted: AtomicUsize,
    ingest_completed: AtomicUsize,
    ingest_failed: AtomicUsize,
    keyword_submitted: AtomicUsize,
    keyword_completed: AtomicUsize,
    keyword_failed: AtomicUsize,
    /// Items currently inside a worker, keyed to their queue name
    active: DashMap<Uuid, &'static str>,
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub ingest_submitted: usize,
    pub ingest_completed: usize,
    pub ingest_failed: usize,
    pub ingest_in_flight: usize,
    pub keyword_submitted: usize,
    pub keyword_completed: usize,
    pub keyword_failed: usize,
    pub keyword_in_flight: usize,
    pub ingest_concurrency: usize,
    pub keyword_concurrency: usize,
    /// Items a worker is processing right now
    pub active_items: Vec<Uuid>,
}

/// Fire-and-forget job submission for both pipelines
#[derive(Clone)]
pub struct JobQueue {
    ingest_tx: mpsc::Sender<Uuid>,
    keyword_tx: mpsc::Sender<Uuid>,
    counters: Arc<QueueCounters>,
    ingest_concurrency: usize,
    keyword_concurrency: usize,
}

impl JobQueue {
    /// Create the queue; the returned receivers belong to the workers
    pub fn new(
        ingest_concurrency: usize,
        keyword_concurrency: usize,
    ) -> (Self, mpsc::Receiver<Uuid>, mpsc::Receiver<Uuid>) {
        let (ingest_tx, ingest_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (keyword_tx, keyword_rx) = mpsc::channel(QUEUE_CAPACITY);

        let queue = Self {
            ingest_tx,
            keyword_tx,
            counters: Arc::new(QueueCounters::default()),
            ingest_concurrency: ingest_concurrency.max(1),
            keyword_concurrency: keyword_concurrency.max(1),
        };
        (queue, ingest_rx, keyword_rx)
    }

    /// Submit an item for ingestion processing
    pub async fn enqueue_process_item(&self, item_id: Uuid) -> Result<()> {
        self.ingest_tx
            .send(item_id)
            .await
            .map_err(|_| Error::transient("ingestion queue is closed"))?;
        self.counters.ingest_submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Submit an item for keyword extraction
    pub async fn enqueue_extract_keywords(&self, item_id: Uuid) -> Result<()> {
        self.keyword_tx
            .send(item_id)
            .await
            .map_err(|_| Error::transient("keyword queue is closed"))?;
        self.counters.keyword_submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        let ingest_submitted = c.ingest_submitted.load(Ordering::SeqCst);
        let ingest_completed = c.ingest_completed.load(Ordering::SeqCst);
        let ingest_failed = c.ingest_failed.load(Ordering::SeqCst);
        let keyword_submitted = c.keyword_submitted.load(Ordering::SeqCst);
        let keyword_completed = c.keyword_completed.load(Ordering::SeqCst);
        let keyword_failed = c.keyword_failed.load(Ordering::SeqCst);

        QueueStats {
            ingest_submitted,
            ingest_completed,
            ingest_failed,
            ingest_in_flight: ingest_submitted.saturating_sub(ingest_completed + ingest_failed),
            keyword_submitted,
            keyword_completed,
            keyword_failed,
            keyword_in_flight: keyword_submitted
                .saturating_sub(keyword_completed + keyword_failed),
            ingest_concurrency: self.ingest_concurrency,
            keyword_concurrency: self.keyword_concurrency,
            active_items: c.active.iter().map(|entry| *entry.key()).collect(),
        }
    }

    fn counters(&self) -> Arc<QueueCounters> {
        self.counters.clone()
    }
}

/// Worker pool draining the ingestion queue
pub struct IngestWorker {
    store: Arc<dyn ItemStore>,
    processor: Arc<ItemProcessor>,
    fanout: Arc<FeedProcessor>,
    concurrency: usize,
    counters: Arc<QueueCounters>,
}

impl IngestWorker {
    pub fn new(
        store: Arc<dyn ItemStore>,
        processor: Arc<ItemProcessor>,
        fanout: Arc<FeedProcessor>,
        queue: &JobQueue,
    ) -> Self {
        Self {
            store,
            processor,
            fanout,
            concurrency: queue.ingest_concurrency,
            counters: queue.counters(),
        }
    }

    /// Drain the queue until it closes, running up to `concurrency` jobs
    /// at once
    pub async fn run(self, mut receiver: mpsc::Receiver<Uuid>) {
        tracing::info!("Ingestion worker started ({} concurrent jobs)", self.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        while let Some(item_id) = receiver.recv().await {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let store = self.store.clone();
            let processor = self.processor.clone();
            let fanout = self.fanout.clone();
            let counters = self.counters.clone();

            tokio::spawn(async move {
                let _permit = permit;
                counters.active.insert(item_id, "ingest");
                let outcome = match store.get_item(item_id).await {
                    Ok(item) if item.kind == ItemKind::AgentFeed => {
                        fanout.process(item_id).await.map(|_| ())
                    }
                    Ok(_) => processor.process(item_id).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                counters.active.remove(&item_id);

                match outcome {
                    Ok(()) => {
                        counters.ingest_completed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        counters.ingest_failed.fetch_add(1, Ordering::SeqCst);
                        tracing::error!("Ingestion job for item {} failed: {}", item_id, e);
                    }
                }
            });
        }

        tracing::info!("Ingestion worker stopped");
    }
}

/// Worker pool draining the keyword extraction queue
pub struct KeywordWorker {
    extractor: Arc<KeywordExtractor>,
    concurrency: usize,
    counters: Arc<QueueCounters>,
}

impl KeywordWorker {
    pub fn new(extractor: Arc<KeywordExtractor>, queue: &JobQueue) -> Self {
        Self {
            extractor,
            concurrency: queue.keyword_concurrency,
            counters: queue.counters(),
        }
    }

    pub async fn run(self, mut receiver: mpsc::Receiver<Uuid>) {
        tracing::info!("Keyword worker started ({} concurrent jobs)", self.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        while let Some(item_id) = receiver.recv().await {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let extractor = self.extractor.clone();
            let counters = self.counters.clone();

            tokio::spawn(async move {
                let _permit = permit;
                counters.active.insert(item_id, "keywords");
                let result = extractor.run(item_id).await;
                counters.active.remove(&item_id);
                match result {
                    Ok(keywords) => {
                        counters.keyword_completed.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!(
                            "Keyword job for item {} stored {} keywords",
                            item_id,
                            keywords.len()
                        );
                    }
                    Err(e) => {
                        counters.keyword_failed.fetch_add(1, Ordering::SeqCst);
                        tracing::error!("Keyword job for item {} failed: {}", item_id, e);
                    }
                }
            });
        }

        tracing::info!("Keyword worker stopped");
    }
}
