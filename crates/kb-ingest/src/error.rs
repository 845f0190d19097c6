//! Error types for the ingestion pipeline

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input to a pipeline stage (empty text, inconsistent chunk params)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Item is misconfigured (e.g. feed item without source URLs)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Both extraction paths failed or produced empty text
    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),

    /// Source kind has no extraction path
    #[error("Unsupported source kind: {0}")]
    UnsupportedSourceKind(String),

    /// Upstream service answered 429; carries the parsed Retry-After if any
    #[error("Rate limited by upstream service")]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure or upstream 5xx; safe to retry
    #[error("Transient upstream error: {0}")]
    Transient(String),

    /// Bad request, auth failure, or other non-retryable upstream rejection
    #[error("Permanent upstream error: {0}")]
    Permanent(String),

    /// Retry budget spent; wraps the last error observed
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Chunk batch insert failed
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Item (or other record) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an extraction error
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailed(message.into())
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Whether the retry policy may attempt this call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Connection drops and timeouts are retryable; status-code
        // classification happens where the response is inspected.
        Error::Transient(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "invalid_input", msg.clone()),
            Error::InvalidConfiguration(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_configuration", msg.clone())
            }
            Error::ExtractionFailed(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "extraction_failed",
                msg.clone(),
            ),
            Error::UnsupportedSourceKind(kind) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unsupported_source_kind",
                format!("Unsupported source kind: {}", kind),
            ),
            Error::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                self.to_string(),
            ),
            Error::Transient(msg) => (StatusCode::BAD_GATEWAY, "transient_error", msg.clone()),
            Error::Permanent(msg) => (StatusCode::BAD_GATEWAY, "permanent_error", msg.clone()),
            Error::RetriesExhausted { .. } => (
                StatusCode::BAD_GATEWAY,
                "retries_exhausted",
                self.to_string(),
            ),
            Error::Persistence(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_failed",
                msg.clone(),
            ),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::RateLimited { retry_after: None }.is_retryable());
        assert!(Error::transient("connection reset").is_retryable());
        assert!(!Error::permanent("401 unauthorized").is_retryable());
        assert!(!Error::invalid_input("empty text").is_retryable());
        assert!(!Error::RetriesExhausted {
            attempts: 5,
            source: Box::new(Error::transient("timeout")),
        }
        .is_retryable());
    }

    #[test]
    fn retries_exhausted_preserves_cause() {
        let err = Error::RetriesExhausted {
            attempts: 5,
            source: Box::new(Error::RateLimited { retry_after: None }),
        };
        let text = err.to_string();
        assert!(text.contains("5 attempts"));
        assert!(text.contains("Rate limited"));
    }
}
