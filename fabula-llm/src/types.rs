//! Core types for generation requests and responses.

use serde::{Deserialize, Serialize};

/// Sampling parameters forwarded to the model backend.
///
/// Fields a backend does not understand are simply not sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, higher = more creative).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff.
    #[serde(default)]
    pub top_k: Option<u32>,
    /// Penalty applied to repeated tokens.
    #[serde(default)]
    pub repetition_penalty: Option<f32>,
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.8
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: None,
            top_k: None,
            repetition_penalty: None,
        }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Sampling parameters.
    pub params: ModelParams,
    /// Strings at which generation is cut off (matched case-insensitively).
    pub stop_sequences: Vec<String>,
    /// Request timeout in milliseconds. `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl LlmRequest {
    /// Create a request with default parameters.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: ModelParams::default(),
            stop_sequences: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Override the sampling parameters.
    #[must_use]
    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    /// Set the stop sequences.
    #[must_use]
    pub fn with_stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated, when the backend reports it.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}
