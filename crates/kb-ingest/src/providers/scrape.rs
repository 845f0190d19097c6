//! Single-page scrape provider: the rendering scrape service

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::ScrapeConfig;
use crate::error::{Error, Result};

/// Result of a rich page scrape
#[derive(Debug, Clone, Default)]
pub struct ScrapedPage {
    /// Cleaned main-content markdown, when the service produced it
    pub markdown: Option<String>,
    /// Rendered HTML, when the service produced it
    pub html: Option<String>,
}

/// Trait for scraping a single web page
#[async_trait]
pub trait PageScraper: Send + Sync {
    /// Render and scrape one URL
    async fn scrape(&self, url: &str) -> Result<ScrapedPage>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Client for the hosted rendering scrape service
///
/// Renders JavaScript and returns the page's main content as markdown,
/// falling back to raw rendered HTML.
pub struct RenderScraper {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RenderScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("scrape client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[derive(serde::Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    render: bool,
}

#[derive(serde::Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    html: Option<String>,
}

#[async_trait]
impl PageScraper for RenderScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        let mut request = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .json(&ScrapeRequest { url, render: true });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        // Scrape failures are transient unless the request itself was bad
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::transient(format!("scrape service {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::permanent(format!(
                "scrape service {}: {}",
                status, body
            )));
        }

        let parsed: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("scrape response: {}", e)))?;

        Ok(ScrapedPage {
            markdown: parsed.markdown,
            html: parsed.html,
        })
    }

    fn name(&self) -> &str {
        "render-scraper"
    }
}
