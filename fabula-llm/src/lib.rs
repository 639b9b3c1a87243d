//! # fabula-llm: Model-Service Layer for FABULA
//!
//! Everything FABULA needs from outside the process goes through this crate:
//!   - **Text generation**: blocking ([`TextGenerator`]) or streamed
//!     ([`StreamingGenerator`]) against Ollama, OpenAI-compatible APIs or
//!     text-generation-webui
//!   - **Embeddings**: an [`Embedder`] over an HTTP embedding service
//!   - **Prompt templates**: genre framing, the story-structure explainer
//!     and the pure turn-prompt assembly
//!
//! # Streaming
//!
//! ```text
//! backend ──bytes──▶ wire parser ──chunks──▶ stop-sequence filter ──▶ TextStream
//!                    (NDJSON/SSE)                                     Chunk* End
//! ```

pub mod client;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod types;
mod wire;

pub use client::{LlmClient, LlmProvider};
pub use embedding::{Embedder, HashingEmbedder, HttpEmbeddingClient};
pub use error::{EmbeddingError, LlmError};
pub use generator::{
    ScriptedGenerator, StreamEvent, StreamingGenerator, TextGenerator, TextStream, collect_stream,
};
pub use prompt::Genre;
pub use types::{LlmRequest, LlmResponse, ModelParams};
