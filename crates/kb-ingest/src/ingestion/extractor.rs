//! Text extraction for each source kind
//!
//! Produces the non-empty text a knowledge-base item gets chunked from,
//! independent of downstream chunking.

use std::sync::Arc;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use crate::config::ScrapeConfig;
use crate::error::{Error, Result};
use crate::providers::{PageScraper, RetryPolicy, ScrapedPage};
use crate::types::{KnowledgeBaseItem, ListingRecord, SourcePayload};

/// Longest description excerpt carried into a feed child's text
const MAX_DESCRIPTION_CHARS: usize = 600;
/// Feature tags kept in a feed child's text
const MAX_FEATURES: usize = 12;

/// Produces raw text for a source item
pub struct TextExtractor {
    scraper: Arc<dyn PageScraper>,
    fetch_client: reqwest::Client,
    policy: RetryPolicy,
}

impl TextExtractor {
    pub fn new(scraper: Arc<dyn PageScraper>, config: &ScrapeConfig) -> Result<Self> {
        let fetch_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("fetch client: {}", e)))?;

        Ok(Self {
            scraper,
            fetch_client,
            policy: RetryPolicy::new(config.max_attempts),
        })
    }

    /// Extract the item's text, or fail with the kind-appropriate error
    pub async fn extract(&self, item: &KnowledgeBaseItem) -> Result<String> {
        match &item.source {
            SourcePayload::Url { url } => self.extract_url(url).await,
            SourcePayload::Text { text } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(Error::extraction("text item has no content"));
                }
                Ok(trimmed.to_string())
            }
            SourcePayload::File { filename } => Err(Error::UnsupportedSourceKind(format!(
                "file ({})",
                filename
            ))),
            SourcePayload::Listing { record } => Ok(synthesize_listing_text(record)),
            SourcePayload::AgentFeed { .. } => Err(Error::UnsupportedSourceKind(
                "agent-feed items hold no text of their own".to_string(),
            )),
        }
    }

    /// Rich scrape first, basic fetch-and-strip on any failure
    async fn extract_url(&self, url: &str) -> Result<String> {
        match self
            .policy
            .run("scrape", || self.scraper.scrape(url))
            .await
        {
            Ok(page) => {
                let text = page_to_text(&page);
                if !text.trim().is_empty() {
                    return Ok(text);
                }
                tracing::warn!("Rich scrape of {} returned empty content, falling back", url);
            }
            Err(e) => {
                tracing::warn!("Rich scrape of {} failed ({}), falling back", url, e);
            }
        }

        let text = self
            .policy
            .run("fetch", || self.fetch_basic(url))
            .await
            .map_err(|e| {
                Error::extraction(format!("both scrape paths failed for {}: {}", url, e))
            })?;

        if text.trim().is_empty() {
            return Err(Error::extraction(format!(
                "both scrape paths yielded empty text for {}",
                url
            )));
        }
        Ok(text)
    }

    /// Plain GET with markup stripped; no JavaScript rendering
    async fn fetch_basic(&self, url: &str) -> Result<String> {
        let response = self.fetch_client.get(url).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(Error::transient(format!("fetch {}: {}", url, status)));
        }
        if !status.is_success() {
            return Err(Error::permanent(format!("fetch {}: {}", url, status)));
        }
        let body = response.text().await?;
        Ok(html_to_text(&body))
    }
}

/// Flatten a scraped page to plain text, preferring markdown
fn page_to_text(page: &ScrapedPage) -> String {
    if let Some(markdown) = page.markdown.as_deref() {
        if !markdown.trim().is_empty() {
            return markdown_to_text(markdown);
        }
    }
    page.html
        .as_deref()
        .map(html_to_text)
        .unwrap_or_default()
}

/// Flatten markdown to plain text, one line per block
pub fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item) => out.push('\n'),
            Event::Start(Tag::Item) => out.push_str("- "),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Strip markup from an HTML document, keeping body text nodes
pub fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let body_selector = scraper::Selector::parse("body").unwrap();

    let mut content = String::new();
    if let Some(body) = document.select(&body_selector).next() {
        for text in body.text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                if !content.is_empty() {
                    content.push(' ');
                }
                content.push_str(trimmed);
            }
        }
    }
    content
}

/// Synthesize concise embedding text for a feed listing
///
/// Deliberately a curated subset of the record: the full structured record
/// travels as chunk metadata instead, keeping the embedding focused on
/// searchable signal.
pub fn synthesize_listing_text(record: &ListingRecord) -> String {
    let mut lines = vec![record.title.clone()];

    if let Some(location) = record.location.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(format!("Location: {}", location.trim()));
    }
    if let Some(category) = record.category.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(format!("Category: {}", category.trim()));
    }
    if let Some(price) = record.price.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(format!("Price: {}", price.trim()));
    }
    for (fact, value) in &record.counts {
        lines.push(format!("{}: {}", fact, value));
    }
    if let Some(description) = record.description.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(excerpt(description.trim(), MAX_DESCRIPTION_CHARS));
    }
    if !record.features.is_empty() {
        let tags: Vec<&str> = record
            .features
            .iter()
            .map(String::as_str)
            .take(MAX_FEATURES)
            .collect();
        lines.push(format!("Features: {}", tags.join(", ")));
    }

    lines.join("\n")
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;

    struct StaticScraper {
        page: std::result::Result<ScrapedPage, ()>,
    }

    #[async_trait]
    impl PageScraper for StaticScraper {
        async fn scrape(&self, _url: &str) -> Result<ScrapedPage> {
            match &self.page {
                Ok(page) => Ok(page.clone()),
                Err(_) => Err(Error::permanent("scrape unavailable")),
            }
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn extractor_with(page: std::result::Result<ScrapedPage, ()>) -> TextExtractor {
        TextExtractor::new(Arc::new(StaticScraper { page }), &ScrapeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn text_kind_is_trimmed() {
        let extractor = extractor_with(Err(()));
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "  hello world  ");
        assert_eq!(extractor.extract(&item).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn empty_text_fails_extraction() {
        let extractor = extractor_with(Err(()));
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "   ");
        assert!(matches!(
            extractor.extract(&item).await,
            Err(Error::ExtractionFailed(_))
        ));
    }

    #[tokio::test]
    async fn file_kind_is_an_explicit_gap() {
        let extractor = extractor_with(Err(()));
        let item = KnowledgeBaseItem::from_file(Uuid::new_v4(), "menu.pdf");
        match extractor.extract(&item).await {
            Err(Error::UnsupportedSourceKind(msg)) => assert!(msg.contains("menu.pdf")),
            other => panic!("expected UnsupportedSourceKind, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn url_kind_uses_rich_markdown() {
        let extractor = extractor_with(Ok(ScrapedPage {
            markdown: Some("# Menu\n\nPasta and *wine*.".to_string()),
            html: None,
        }));
        let item = KnowledgeBaseItem::from_url(Uuid::new_v4(), "https://x.test");
        let text = extractor.extract(&item).await.unwrap();
        assert!(text.contains("Menu"));
        assert!(text.contains("Pasta and wine."));
        assert!(!text.contains('#'));
    }

    #[test]
    fn html_strip_keeps_text_only() {
        let text =
            html_to_text("<html><body><h1>Hours</h1><p>Open <b>daily</b> 9-5.</p></body></html>");
        assert_eq!(text, "Hours Open daily 9-5.");
    }

    #[test]
    fn listing_text_is_concise_and_curated() {
        let mut record = ListingRecord::new("l-77", "Sunset Villa");
        record.location = Some("12 Shore Rd, Brightwater".to_string());
        record.category = Some("vacation rental".to_string());
        record.price = Some("$420/night".to_string());
        record.counts.insert("bathrooms".to_string(), 2);
        record.counts.insert("bedrooms".to_string(), 3);
        record.description = Some("Long description. ".repeat(100));
        record.features = (0..20).map(|i| format!("feature-{i}")).collect();
        record.raw = serde_json::json!({"internal_score": 0.93});

        let text = synthesize_listing_text(&record);
        assert!(text.starts_with("Sunset Villa"));
        assert!(text.contains("Location: 12 Shore Rd, Brightwater"));
        assert!(text.contains("bedrooms: 3"));
        assert!(text.contains("bathrooms: 2"));
        assert!(text.contains("Price: $420/night"));
        assert!(text.contains("feature-11"));
        // Capped: tag 13+ and the raw record stay out of the embedding text
        assert!(!text.contains("feature-12"));
        assert!(!text.contains("internal_score"));
        // Description excerpt is bounded
        let description_line = text.lines().find(|l| l.contains("Long description")).unwrap();
        assert!(description_line.chars().count() <= MAX_DESCRIPTION_CHARS + 1);
    }
}
