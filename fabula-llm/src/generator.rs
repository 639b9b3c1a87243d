//! Generation traits shared by every backend.
//!
//! The engine talks to language models only through [`TextGenerator`]
//! (prompt in, text out) and [`StreamingGenerator`] (prompt in, lazy
//! sequence of chunks out).  A [`TextStream`] is finite and cannot be
//! restarted: it yields zero or more [`StreamEvent::Chunk`]s in
//! generation order and then exactly one [`StreamEvent::End`].

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;

use crate::error::LlmError;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One item of a streamed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The next piece of generated text.
    Chunk(String),
    /// Generation finished. Nothing follows.
    End,
}

/// A lazy, in-order stream of generated text.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Prompt in, full completion out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the backend fails or is unreachable.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Prompt in, chunk stream out.
#[async_trait]
pub trait StreamingGenerator: Send + Sync {
    /// Start a streamed generation for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the generation cannot be started.
    async fn stream(&self, prompt: &str) -> Result<TextStream, LlmError>;
}

// ---------------------------------------------------------------------------
// Stream consumption
// ---------------------------------------------------------------------------

/// Drain a stream, calling `on_chunk` for every chunk in arrival order.
///
/// Returns the concatenated text once the [`StreamEvent::End`] marker
/// arrives.  A stream that closes without the marker is treated as an
/// abnormal connector close.
///
/// # Errors
///
/// Propagates the first error item, or [`LlmError::Connector`] if the
/// stream ends early.
pub async fn collect_stream<F>(mut stream: TextStream, mut on_chunk: F) -> Result<String, LlmError>
where
    F: FnMut(&str),
{
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Chunk(chunk) => {
                on_chunk(&chunk);
                text.push_str(&chunk);
            }
            StreamEvent::End => return Ok(text),
        }
    }
    Err(LlmError::Connector(
        "stream closed before the end of generation".into(),
    ))
}

/// Cut a stream at the first occurrence of any stop sequence.
///
/// Matching is ASCII case-insensitive.  Text that might be the start of
/// a stop sequence is held back until it can be ruled out, so the stop
/// sequence itself is never emitted.  Hitting a stop sequence ends the
/// stream with [`StreamEvent::End`].
#[must_use]
pub fn truncate_at_stops(inner: TextStream, stops: &[String]) -> TextStream {
    let filter = StopSequenceFilter::new(stops);
    if filter.stops.is_empty() {
        return inner;
    }

    let stream = inner
        .scan(filter, |filter, item| {
            let events = if filter.is_stopped() {
                None
            } else {
                Some(match item {
                    Ok(StreamEvent::Chunk(chunk)) => {
                        let mut events = Vec::with_capacity(2);
                        let emitted = filter.push(&chunk);
                        if !emitted.is_empty() {
                            events.push(Ok(StreamEvent::Chunk(emitted)));
                        }
                        if filter.is_stopped() {
                            events.push(Ok(StreamEvent::End));
                        }
                        events
                    }
                    Ok(StreamEvent::End) => {
                        let mut events = Vec::with_capacity(2);
                        let rest = filter.finish();
                        if !rest.is_empty() {
                            events.push(Ok(StreamEvent::Chunk(rest)));
                        }
                        events.push(Ok(StreamEvent::End));
                        events
                    }
                    Err(e) => vec![Err(e)],
                })
            };
            futures::future::ready(events)
        })
        .flat_map(futures::stream::iter);

    Box::pin(stream)
}

/// Incremental stop-sequence matcher used by [`truncate_at_stops`].
#[derive(Debug, Clone)]
pub struct StopSequenceFilter {
    stops: Vec<String>,
    pending: String,
    stopped: bool,
}

impl StopSequenceFilter {
    /// Create a filter. Empty stop strings are ignored.
    #[must_use]
    pub fn new(stops: &[String]) -> Self {
        Self {
            stops: stops
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            pending: String::new(),
            stopped: false,
        }
    }

    /// Whether a stop sequence has been seen.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed a chunk; returns the text that is now safe to emit.
    pub fn push(&mut self, chunk: &str) -> String {
        if self.stopped {
            return String::new();
        }
        self.pending.push_str(chunk);
        let lower = self.pending.to_ascii_lowercase();

        if let Some(cut) = self.stops.iter().filter_map(|s| lower.find(s.as_str())).min() {
            self.stopped = true;
            let emitted = self.pending[..cut].to_string();
            self.pending.clear();
            return emitted;
        }

        let held = self.partial_match_len(&lower);
        let split = self.pending.len() - held;
        let emitted = self.pending[..split].to_string();
        self.pending.replace_range(..split, "");
        emitted
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> String {
        if self.stopped {
            return String::new();
        }
        std::mem::take(&mut self.pending)
    }

    /// Length of the longest suffix of `lower` that begins some stop sequence.
    fn partial_match_len(&self, lower: &str) -> usize {
        let longest = self.stops.iter().map(String::len).max().unwrap_or(0);
        let upper = longest.saturating_sub(1).min(lower.len());
        (1..=upper)
            .rev()
            .find(|&k| {
                let start = lower.len() - k;
                lower.is_char_boundary(start)
                    && self.stops.iter().any(|s| s.starts_with(&lower[start..]))
            })
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Scripted generator (tests & offline runs)
// ---------------------------------------------------------------------------

/// A generator that replays canned responses in order.
///
/// Once only one response is left it is repeated forever.  Every prompt
/// it receives is recorded so tests can inspect what was sent.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    /// Create a generator that answers with `responses` in order.
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    fn next_response(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        let mut responses = self.responses.lock();
        let next = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        next.ok_or_else(|| LlmError::Unavailable("scripted generator has no responses".into()))
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.next_response(prompt)
    }
}

#[async_trait]
impl StreamingGenerator for ScriptedGenerator {
    async fn stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        let text = self.next_response(prompt)?;
        let mut events: Vec<Result<StreamEvent, LlmError>> = text
            .split_inclusive(' ')
            .map(|word| Ok(StreamEvent::Chunk(word.to_string())))
            .collect();
        events.push(Ok(StreamEvent::End));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
