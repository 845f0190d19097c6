//! Single-item processor: the ingestion status-machine driver

use std::sync::Arc;

use futures_util::future::join_all;
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::ingestion::{ChunkSpan, TextExtractor, TokenChunker};
use crate::providers::{Embedding, EmbeddingProvider, RetryPolicy};
use crate::store::ItemStore;
use crate::types::{ChunkMetadata, EmbeddedChunk, KnowledgeBaseItem, SourcePayload};

use super::persister::BatchPersister;

/// Outcome of one processing run
#[derive(Debug, Clone, Copy)]
pub struct ProcessReport {
    /// Chunks embedded and persisted
    pub chunk_count: usize,
    /// True when another job already held the item in `processing`
    pub skipped: bool,
}

/// Drives one item through extract → chunk → embed → persist → indexed,
/// transitioning it to `failed` at the first unrecoverable error
pub struct ItemProcessor {
    store: Arc<dyn ItemStore>,
    extractor: Arc<TextExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    embed_policy: RetryPolicy,
    processing: ProcessingConfig,
}

impl ItemProcessor {
    pub fn new(
        store: Arc<dyn ItemStore>,
        extractor: Arc<TextExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        embed_max_attempts: u32,
        processing: ProcessingConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            embedder,
            embed_policy: RetryPolicy::new(embed_max_attempts),
            processing,
        }
    }

    /// Process one item to completion or terminal failure
    ///
    /// Errors re-raise after the status update so the job runner can apply
    /// its own job-level retry. A missing item cannot be marked failed and
    /// propagates as `NotFound` untouched.
    pub async fn process(&self, item_id: Uuid) -> Result<ProcessReport> {
        let item = self.store.get_item(item_id).await?;

        if !self.store.mark_processing(item_id).await? {
            tracing::warn!("Item {} is already processing, skipping duplicate job", item_id);
            return Ok(ProcessReport {
                chunk_count: 0,
                skipped: true,
            });
        }

        match self.run_pipeline(&item).await {
            Ok(chunk_count) => {
                self.store.mark_indexed(item_id).await?;
                tracing::info!(
                    "Item {} indexed ({} chunks, kind: {})",
                    item_id,
                    chunk_count,
                    item.kind.as_str()
                );
                Ok(ProcessReport {
                    chunk_count,
                    skipped: false,
                })
            }
            Err(err) => {
                tracing::error!("Item {} failed: {}", item_id, err);
                if let Err(update_err) = self.store.mark_failed(item_id, &err.to_string()).await {
                    tracing::error!(
                        "Could not record failure on item {}: {}",
                        item_id,
                        update_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, item: &KnowledgeBaseItem) -> Result<usize> {
        let text = self.extractor.extract(item).await?;

        let chunker = TokenChunker::new(
            item.effective_chunk_size(),
            item.effective_chunk_overlap(),
        )?;
        let spans = chunker.chunk(&text)?;
        tracing::debug!("Item {}: {} chunks from {} chars", item.id, spans.len(), text.len());

        // Feed children carry their full source record as chunk metadata
        // and persist in smaller batches (listing rows are heavy).
        let (batch_size, metadata) = match &item.source {
            SourcePayload::Listing { record } => (
                self.processing.feed_persist_batch_size,
                Some(ChunkMetadata::Listing(record.clone())),
            ),
            _ => (self.processing.persist_batch_size, None),
        };

        self.embed_and_persist(item, spans, batch_size, metadata)
            .await
    }

    /// Embed and persist spans one batch at a time, in index order
    ///
    /// Peak memory holds a single batch of vectors; each batch is dropped
    /// once written. Embedding calls run in small concurrent groups,
    /// each wrapped in the per-chunk retry policy.
    async fn embed_and_persist(
        &self,
        item: &KnowledgeBaseItem,
        spans: Vec<ChunkSpan>,
        batch_size: usize,
        metadata: Option<ChunkMetadata>,
    ) -> Result<usize> {
        let total = spans.len();
        let chunk_total = total as u32;
        let batch_size = batch_size.max(1);
        let embed_concurrency = self.processing.effective_embed_concurrency();
        let persister = BatchPersister::new(self.store.clone(), batch_size);

        // Reprocessing replaces the item's chunk set wholesale
        let removed = self.store.delete_chunks(item.id).await?;
        if removed > 0 {
            tracing::info!("Item {}: replaced {} existing chunks", item.id, removed);
        }

        let mut written = 0usize;
        for batch in spans.chunks(batch_size) {
            let mut records: Vec<EmbeddedChunk> = Vec::with_capacity(batch.len());

            for group in batch.chunks(embed_concurrency) {
                let embeddings =
                    join_all(group.iter().map(|span| self.embed_with_retry(&span.content))).await;

                for (span, embedding) in group.iter().zip(embeddings) {
                    let embedding = embedding?;
                    let mut chunk = EmbeddedChunk::new(
                        item.id,
                        item.knowledge_base_id,
                        span.content.clone(),
                        span.index,
                        chunk_total,
                        // Service-reported count is authoritative; fall back
                        // to the chunker's when the service omits it.
                        if embedding.token_count > 0 {
                            embedding.token_count
                        } else {
                            span.token_count
                        },
                        embedding.vector,
                    );
                    if let Some(meta) = &metadata {
                        chunk = chunk.with_metadata(meta.clone());
                    }
                    records.push(chunk);
                }
            }

            written += persister.persist(records).await?;

            if self.processing.inter_batch_delay_ms > 0 && written < total {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.processing.inter_batch_delay_ms,
                ))
                .await;
            }
        }

        Ok(written)
    }

    /// One chunk's embedding call, retried independently of its siblings
    async fn embed_with_retry(&self, content: &str) -> Result<Embedding> {
        self.embed_policy
            .run("embed", || self.embedder.embed(content))
            .await
    }
}
