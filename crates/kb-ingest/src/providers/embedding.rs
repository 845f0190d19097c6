//! Embedding provider trait and HTTP client

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::retry::parse_retry_after;

/// One embedding result: the vector plus the service's token count
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub token_count: u32,
}

/// Trait for generating text embeddings
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text span
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Vector dimensionality the service produces
    fn dimensions(&self) -> usize;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// HTTP embedding client against an embeddings endpoint
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("embedding client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
    usage: EmbedUsage,
}

#[derive(serde::Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[derive(serde::Deserialize)]
struct EmbedUsage {
    prompt_tokens: u32,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut request = self.client.post(self.endpoint()).json(&EmbedRequest {
            model: &self.model,
            input: text,
        });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(Error::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(Error::transient(format!("embedding service {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::permanent(format!(
                "embedding service {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("embedding response: {}", e)))?;

        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::permanent("embedding response contained no vectors"))?;

        if datum.embedding.len() != self.dimensions {
            return Err(Error::permanent(format!(
                "embedding dimensionality mismatch: expected {}, got {}",
                self.dimensions,
                datum.embedding.len()
            )));
        }

        Ok(Embedding {
            vector: datum.embedding,
            token_count: parsed.usage.prompt_tokens,
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self.client.get(&self.base_url).send().await?;
        Ok(!response.status().is_server_error())
    }

    fn name(&self) -> &str {
        "http-embedder"
    }
}
