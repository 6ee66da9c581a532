//! Error taxonomy shared by the engine, HTTP API, and MCP handler.
//!
//! Every fallible engine operation returns [`Error`]. The HTTP layer maps
//! variants to status codes; the MCP layer maps them to tool-call errors.
//! Retries live at the I/O boundary (embedding, vector store); by the time
//! an `Upstream` error surfaces here, retries are exhausted.

use thiserror::Error;

/// Engine error kinds. The short machine-readable code (`code()`) is what
/// API responses carry; the display message holds the detail.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration. Names the offending field.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed request: missing fields, wrong types, empty values.
    #[error("invalid input: {0}")]
    Input(String),

    /// Unknown project, chunk, or group where one was expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// Embedding service or vector store failed after retries.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A deadline was exceeded.
    #[error("timed out: {0}")]
    Timeout(String),

    /// An indexing run failed irrecoverably.
    #[error("index error: {0}")]
    Index(String),

    /// The embedding service returned vectors of the wrong dimension.
    #[error("embedding shape mismatch: expected {expected}, got {actual}")]
    EmbeddingShape { expected: usize, actual: usize },

    /// Client or shutdown cancellation.
    #[error("canceled")]
    Canceled,

    /// Invariant violation: a bug, not an operational fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Input(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::Upstream(_) => "upstream_error",
            Error::Timeout(_) => "timeout",
            Error::Index(_) => "index_error",
            Error::EmbeddingShape { .. } => "embedding_shape",
            Error::Canceled => "canceled",
            Error::Internal(_) => "internal",
        }
    }

    /// HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Config(_) | Error::Input(_) => 400,
            Error::NotFound(_) => 404,
            Error::Upstream(_) | Error::EmbeddingShape { .. } => 502,
            Error::Timeout(_) => 504,
            Error::Index(_) | Error::Internal(_) => 500,
            Error::Canceled => 499,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Internal(format!("sqlite: {other}")),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Upstream(e.to_string())
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::Input("x".into()).code(), "bad_request");
        assert_eq!(Error::NotFound("x".into()).code(), "not_found");
        assert_eq!(Error::Timeout("x".into()).code(), "timeout");
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(Error::Input("x".into()).http_status(), 400);
        assert_eq!(Error::NotFound("x".into()).http_status(), 404);
        assert_eq!(Error::Upstream("x".into()).http_status(), 502);
        assert_eq!(Error::Timeout("x".into()).http_status(), 504);
        assert_eq!(
            Error::EmbeddingShape {
                expected: 768,
                actual: 384
            }
            .http_status(),
            502
        );
    }
}
