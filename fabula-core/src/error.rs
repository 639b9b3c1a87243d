//! Error types for the FABULA core library.

use fabula_llm::{EmbeddingError, LlmError};
use thiserror::Error;

/// Top-level error type for all FABULA core operations.
#[derive(Error, Debug)]
pub enum FabulaError {
    /// The outline does not have a child at some level the tracker needs.
    #[error("Invalid outline at stage {stage:?}, campaign {campaign:?}: {reason}")]
    InvalidOutline {
        /// Offending stage index, when the fault is below the root.
        stage: Option<usize>,
        /// Offending campaign index, when the fault is inside a stage or root campaign.
        campaign: Option<usize>,
        /// What is wrong.
        reason: String,
    },

    /// The embedding collaborator failed or broke its contract.
    #[error("Embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    /// The language model failed.
    #[error("Generation failed: {0}")]
    Llm(#[from] LlmError),

    /// The bookmark has moved past the last scene.
    #[error("Story complete: no scene left at the current bookmark")]
    StoryComplete,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, FabulaError>;
