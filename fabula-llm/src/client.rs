//! LLM Client: unified interface for Ollama, OpenAI-compatible and
//! text-generation-webui backends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::generator::{StreamEvent, StreamingGenerator, TextGenerator, TextStream, truncate_at_stops};
use crate::types::{LlmRequest, LlmResponse, ModelParams};
use crate::wire::{parse_ndjson_buffered, parse_sse_buffered};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama { base_url: String },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible { base_url: String, api_key: String },
    /// text-generation-webui blocking API. Streaming degrades to a single chunk.
    TextGenWebUi { base_url: String },
    /// No LLM available: all calls return [`LlmError::Unavailable`].
    None,
}

/// How a streamed body is framed on the wire.
#[derive(Debug, Clone, Copy)]
enum StreamFraming {
    Ndjson,
    Sse,
}

/// The main LLM client that routes requests to the appropriate backend.
///
/// At most one generation runs against a client at a time: every call
/// holds the client's generation lock until its stream is dropped.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    params: ModelParams,
    stop_sequences: Vec<String>,
    timeout_ms: Option<u64>,
    max_retries: u32,
    generation_lock: Arc<Mutex<()>>,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            params: ModelParams::default(),
            stop_sequences: Vec::new(),
            timeout_ms: None,
            max_retries: 0,
            generation_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a client with no LLM backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, "")
    }

    /// Default sampling parameters for prompts sent through the trait interfaces.
    #[must_use]
    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    /// Default stop sequences.
    #[must_use]
    pub fn with_stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }

    /// Default request timeout for blocking calls.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Retries for blocking calls that fail at the transport level.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Build a request for `prompt` using this client's defaults.
    #[must_use]
    pub fn request(&self, prompt: &str) -> LlmRequest {
        LlmRequest::new(prompt)
            .with_params(self.params.clone())
            .with_stop_sequences(self.stop_sequences.clone())
            .with_timeout(self.timeout_ms)
    }

    /// Run a blocking (non-streamed) generation.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the LLM is unavailable or all retries fail.
    pub async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let _guard = self.generation_lock.lock().await;
        self.complete_unlocked(request).await
    }

    async fn complete_unlocked(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let (url, body, bearer) = self.request_body(request, false)?;

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying LLM call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let mut builder = self.http.post(&url).json(&body);
            if let Some(key) = bearer {
                builder = builder.bearer_auth(key);
            }
            if let Some(ms) = request.timeout_ms {
                builder = builder.timeout(Duration::from_millis(ms));
            }

            let start = Instant::now();
            let result = builder.send().await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens_generated) = self.extract_completion(&json)?;
                    return Ok(LlmResponse {
                        text: cut_at_stops(&text, &request.stop_sequences),
                        tokens_generated,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    last_error = format!(
                        "HTTP {}: {}",
                        resp.status(),
                        resp.text().await.unwrap_or_default()
                    );
                    warn!("LLM backend returned error: {}", last_error);
                }
                Err(e) if e.is_timeout() => {
                    warn!("LLM request timed out after {:?}ms", request.timeout_ms);
                    last_error = LlmError::Timeout(request.timeout_ms.unwrap_or(0)).to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("LLM request failed: {}", last_error);
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Start a streamed generation.
    ///
    /// The returned stream holds the client's generation lock until it
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend rejects the request before streaming.
    pub async fn open_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let guard = Arc::clone(&self.generation_lock).lock_owned().await;

        let framing = match &self.provider {
            LlmProvider::Ollama { .. } => StreamFraming::Ndjson,
            LlmProvider::OpenAiCompatible { .. } => StreamFraming::Sse,
            LlmProvider::TextGenWebUi { .. } => {
                let response = self.complete_unlocked(request).await?;
                drop(guard);
                let events = vec![Ok(StreamEvent::Chunk(response.text)), Ok(StreamEvent::End)];
                return Ok(Box::pin(futures::stream::iter(events)));
            }
            LlmProvider::None => {
                return Err(LlmError::Unavailable("No LLM provider configured".into()));
            }
        };

        let (url, body, bearer) = self.request_body(request, true)?;
        let mut builder = self.http.post(&url).json(&body);
        if let Some(key) = bearer {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {text}")));
        }

        let stream = resp
            .bytes_stream()
            .scan(
                (String::new(), Vec::<u8>::new(), guard),
                move |(buffer, carry, _guard), result| {
                    let events = match result {
                        Ok(bytes) => {
                            push_utf8(buffer, carry, &bytes);
                            match framing {
                                StreamFraming::Ndjson => parse_ndjson_buffered(buffer),
                                StreamFraming::Sse => parse_sse_buffered(buffer),
                            }
                        }
                        Err(e) => vec![Err(LlmError::Connector(e.to_string()))],
                    };
                    futures::future::ready(Some(events))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(truncate_at_stops(Box::pin(stream), &request.stop_sequences))
    }

    /// Endpoint, JSON body and optional bearer token for a request.
    fn request_body(
        &self,
        request: &LlmRequest,
        stream: bool,
    ) -> Result<(String, Value, Option<&str>), LlmError> {
        let params = &request.params;
        let needs_model = matches!(
            self.provider,
            LlmProvider::Ollama { .. } | LlmProvider::OpenAiCompatible { .. }
        );
        if needs_model && self.model.trim().is_empty() {
            return Err(LlmError::ConfigError("no model name set for this provider".into()));
        }
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let mut options = json!({
                    "temperature": params.temperature,
                    "num_predict": params.max_tokens,
                });
                if let Some(top_p) = params.top_p {
                    options["top_p"] = json!(top_p);
                }
                if let Some(top_k) = params.top_k {
                    options["top_k"] = json!(top_k);
                }
                if let Some(penalty) = params.repetition_penalty {
                    options["repeat_penalty"] = json!(penalty);
                }
                let body = json!({
                    "model": self.model,
                    "prompt": request.prompt,
                    "stream": stream,
                    "options": options,
                });
                Ok((format!("{base_url}/api/generate"), body, None))
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let mut body = json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": request.prompt }],
                    "max_tokens": params.max_tokens,
                    "temperature": params.temperature,
                    "stream": stream,
                });
                if let Some(top_p) = params.top_p {
                    body["top_p"] = json!(top_p);
                }
                let bearer = (!api_key.is_empty()).then_some(api_key.as_str());
                Ok((format!("{base_url}/v1/chat/completions"), body, bearer))
            }
            LlmProvider::TextGenWebUi { base_url } => {
                let mut body = json!({
                    "prompt": request.prompt,
                    "max_new_tokens": params.max_tokens,
                    "do_sample": true,
                    "temperature": params.temperature,
                    "stopping_strings": request.stop_sequences,
                });
                if let Some(top_p) = params.top_p {
                    body["top_p"] = json!(top_p);
                }
                if let Some(top_k) = params.top_k {
                    body["top_k"] = json!(top_k);
                }
                if let Some(penalty) = params.repetition_penalty {
                    body["repetition_penalty"] = json!(penalty);
                }
                Ok((format!("{base_url}/api/v1/generate"), body, None))
            }
        }
    }

    /// Pull the generated text (and token count, if reported) out of a blocking response.
    fn extract_completion(&self, json: &Value) -> Result<(String, u32), LlmError> {
        let (text, tokens) = match &self.provider {
            LlmProvider::Ollama { .. } => (json["response"].as_str(), json["eval_count"].as_u64()),
            LlmProvider::OpenAiCompatible { .. } => (
                json["choices"][0]["message"]["content"].as_str(),
                json["usage"]["completion_tokens"].as_u64(),
            ),
            LlmProvider::TextGenWebUi { .. } => (json["results"][0]["text"].as_str(), None),
            LlmProvider::None => (None, None),
        };
        let text = text.ok_or_else(|| {
            LlmError::ParseError(format!("response carried no generated text: {json}"))
        })?;
        let tokens = tokens.map_or(0, |t| u32::try_from(t).unwrap_or(u32::MAX));
        Ok((text.to_string(), tokens))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self.complete(&self.request(prompt)).await?;
        Ok(response.text)
    }
}

#[async_trait]
impl StreamingGenerator for LlmClient {
    async fn stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        self.open_stream(&self.request(prompt)).await
    }
}

/// Append `bytes` to `buffer`, carrying an incomplete trailing UTF-8
/// sequence over to the next network chunk.
fn push_utf8(buffer: &mut String, carry: &mut Vec<u8>, bytes: &[u8]) {
    carry.extend_from_slice(bytes);
    match std::str::from_utf8(carry) {
        Ok(text) => {
            buffer.push_str(text);
            carry.clear();
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            buffer.push_str(&String::from_utf8_lossy(&carry[..valid]));
            carry.drain(..valid);
        }
        Err(_) => {
            buffer.push_str(&String::from_utf8_lossy(carry));
            carry.clear();
        }
    }
}

/// Cut a complete text at the first stop sequence (ASCII case-insensitive).
fn cut_at_stops(text: &str, stops: &[String]) -> String {
    let lower = text.to_ascii_lowercase();
    let cut = stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| lower.find(&s.to_ascii_lowercase()))
        .min()
        .unwrap_or(text.len());
    text[..cut].to_string()
}
