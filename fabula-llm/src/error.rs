//! Error types for the model-service layer.

use thiserror::Error;

/// Errors that can occur during text generation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// LLM response was not in the expected shape.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// Generation did not finish within the configured deadline.
    #[error("LLM generation timed out after {0}ms")]
    Timeout(u64),

    /// LLM provider is unavailable.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// The connection to the model closed abnormally mid-generation.
    #[error("LLM connector error: {0}")]
    Connector(String),

    /// All retry attempts exhausted.
    #[error("All LLM retry attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The error reported by the final attempt.
        last_error: String,
    },

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

/// Errors raised by the embedding service collaborator.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The HTTP call itself failed (connection refused, non-2xx, timeout).
    #[error("Embedding request failed: {0}")]
    Request(String),

    /// The service answered, but not with one numeric vector per input.
    #[error("Unexpected response from the embedding service: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Request(err.to_string())
    }
}
