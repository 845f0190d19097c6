//! Fan-out processor for bulk listing feed parents
//!
//! A parent `agent-feed` item never holds chunks itself: its children are
//! rebuilt from the upstream feed on every run, and one bad listing never
//! blocks the rest.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{ListingFeed, RetryPolicy};
use crate::store::ItemStore;
use crate::types::{ItemKind, KnowledgeBaseItem, ListingRecord, SourcePayload};

use super::processor::ItemProcessor;

/// Counts reported after a fan-out run
#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutReport {
    /// Listings fetched from the feed
    pub listings_total: usize,
    /// Children that reached `indexed`
    pub succeeded: usize,
    /// Children that failed; each failure is logged with its listing id
    pub failed: usize,
    /// True when another job already held the parent in `processing`
    pub skipped: bool,
}

/// Processes an `agent-feed` parent: full child replacement, then one
/// independent ingestion per listing
pub struct FeedProcessor {
    store: Arc<dyn ItemStore>,
    feed: Arc<dyn ListingFeed>,
    item_processor: Arc<ItemProcessor>,
    feed_policy: RetryPolicy,
}

impl FeedProcessor {
    pub fn new(
        store: Arc<dyn ItemStore>,
        feed: Arc<dyn ListingFeed>,
        item_processor: Arc<ItemProcessor>,
        feed_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            feed,
            item_processor,
            feed_policy: RetryPolicy::new(feed_max_attempts),
        }
    }

    /// Run the fan-out for one feed parent
    ///
    /// The parent's own status reflects only the orchestration (validate,
    /// delete stale children, fetch the feed): it ends `indexed` even when
    /// some children failed.
    pub async fn process(&self, parent_id: Uuid) -> Result<FanoutReport> {
        let parent = self.store.get_item(parent_id).await?;

        if !self.store.mark_processing(parent_id).await? {
            tracing::warn!(
                "Feed item {} is already processing, skipping duplicate job",
                parent_id
            );
            return Ok(FanoutReport {
                skipped: true,
                ..Default::default()
            });
        }

        let listings = match self.orchestrate(&parent).await {
            Ok(listings) => listings,
            Err(err) => {
                tracing::error!("Feed item {} orchestration failed: {}", parent_id, err);
                if let Err(update_err) =
                    self.store.mark_failed(parent_id, &err.to_string()).await
                {
                    tracing::error!(
                        "Could not record failure on feed item {}: {}",
                        parent_id,
                        update_err
                    );
                }
                return Err(err);
            }
        };

        let mut report = FanoutReport {
            listings_total: listings.len(),
            ..Default::default()
        };

        for record in listings {
            let external_id = record.external_id.clone();
            match self.process_listing(&parent, record).await {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        "Feed item {}: listing {} failed: {}",
                        parent_id,
                        external_id,
                        err
                    );
                }
            }
        }

        self.store.mark_indexed(parent_id).await?;
        tracing::info!(
            "Feed item {} complete: {} listings, {} indexed, {} failed",
            parent_id,
            report.listings_total,
            report.succeeded,
            report.failed
        );

        Ok(report)
    }

    /// Steps 1-3: validation, stale-child deletion, full feed fetch.
    /// A failure here is the parent's failure.
    async fn orchestrate(&self, parent: &KnowledgeBaseItem) -> Result<Vec<ListingRecord>> {
        let source_urls = match &parent.source {
            SourcePayload::AgentFeed { source_urls } => source_urls.as_slice(),
            _ => {
                return Err(Error::InvalidConfiguration(format!(
                    "item {} is {} rather than agent-feed",
                    parent.id,
                    parent.kind.as_str()
                )))
            }
        };
        if source_urls.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "feed item {} has no source URLs configured",
                parent.id
            )));
        }

        let removed = self.store.delete_children(parent.id).await?;
        if removed > 0 {
            tracing::info!("Feed item {}: removed {} stale children", parent.id, removed);
        }

        let listings = self
            .feed_policy
            .run("feed fetch", || self.feed.fetch_all(source_urls))
            .await?;

        tracing::info!(
            "Feed item {}: fetched {} listings from {} source(s)",
            parent.id,
            listings.len(),
            source_urls.len()
        );
        Ok(listings)
    }

    /// One independent child ingestion; the child's own status records the
    /// outcome either way
    async fn process_listing(
        &self,
        parent: &KnowledgeBaseItem,
        record: ListingRecord,
    ) -> Result<()> {
        let child = KnowledgeBaseItem::feed_child(parent, record);
        debug_assert_eq!(child.kind, ItemKind::FeedChild);

        self.store.create_item(&child).await?;
        self.item_processor.process(child.id).await?;
        Ok(())
    }
}
