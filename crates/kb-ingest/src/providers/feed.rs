//! Bulk listing feed provider

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::types::ListingRecord;

/// Trait for fetching the complete listing set behind one or more feed URLs
#[async_trait]
pub trait ListingFeed: Send + Sync {
    /// Fetch every listing across the configured source URLs
    async fn fetch_all(&self, source_urls: &[String]) -> Result<Vec<ListingRecord>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Client for the hosted bulk listing scraper, paginating internally
pub struct HttpListingFeed {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: usize,
}

impl HttpListingFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("feed client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            page_size: config.page_size.max(1),
        })
    }

    async fn fetch_page(&self, source_url: &str, page: usize) -> Result<FeedPage> {
        let mut request = self
            .client
            .get(format!("{}/v1/listings", self.base_url))
            .query(&[
                ("source", source_url),
                ("page", &page.to_string()),
                ("page_size", &self.page_size.to_string()),
            ]);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::transient(format!("feed service {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::permanent(format!("feed service {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::transient(format!("feed response: {}", e)))
    }
}

#[derive(serde::Deserialize)]
struct FeedPage {
    /// Total listings the source reports across all pages
    total: usize,
    listings: Vec<ListingRecord>,
}

#[async_trait]
impl ListingFeed for HttpListingFeed {
    async fn fetch_all(&self, source_urls: &[String]) -> Result<Vec<ListingRecord>> {
        let mut all = Vec::new();

        for source_url in source_urls {
            let mut collected = 0usize;
            let mut page = 1usize;

            loop {
                let result = self.fetch_page(source_url, page).await?;
                let fetched = result.listings.len();
                collected += fetched;

                all.extend(result.listings.into_iter().map(|mut record| {
                    record.source_url = Some(source_url.clone());
                    record
                }));

                tracing::debug!(
                    "Feed page {} of {}: {} listings ({}/{} collected)",
                    page,
                    source_url,
                    fetched,
                    collected,
                    result.total
                );

                // An empty page means the source under-reported its total;
                // stop rather than loop forever.
                if collected >= result.total || fetched == 0 {
                    break;
                }
                page += 1;
            }
        }

        Ok(all)
    }

    fn name(&self) -> &str {
        "http-listing-feed"
    }
}
