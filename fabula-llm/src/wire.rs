//! Incremental parsers for streamed HTTP bodies.
//!
//! Network chunks do not respect line boundaries, so each parser keeps
//! a buffer, consumes every complete line it holds, and leaves any
//! trailing partial line for the next chunk.

use serde_json::Value;

use crate::error::LlmError;
use crate::generator::StreamEvent;

/// Parse newline-delimited JSON as emitted by Ollama's `/api/generate`.
///
/// Each line carries a `response` fragment; the line with `"done": true`
/// closes the generation.
pub(crate) fn parse_ndjson_buffered(buffer: &mut String) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = Vec::new();

    while let Some(newline_pos) = buffer.find('\n') {
        let line = buffer[..newline_pos].trim();
        if !line.is_empty() {
            match serde_json::from_str::<Value>(line) {
                Ok(json) => {
                    if let Some(error) = json["error"].as_str() {
                        events.push(Err(LlmError::Connector(error.to_string())));
                    } else {
                        match json["response"].as_str() {
                            Some(text) if !text.is_empty() => {
                                events.push(Ok(StreamEvent::Chunk(text.to_string())));
                            }
                            _ => {}
                        }
                        if json["done"].as_bool().unwrap_or(false) {
                            events.push(Ok(StreamEvent::End));
                        }
                    }
                }
                Err(e) => events.push(Err(LlmError::ParseError(format!(
                    "NDJSON parse error: {e}"
                )))),
            }
        }
        buffer.drain(..=newline_pos);
    }

    events
}

/// Parse server-sent events from an OpenAI-compatible chat endpoint.
///
/// `data: [DONE]` closes the generation; `event:`/comment lines are skipped.
pub(crate) fn parse_sse_buffered(buffer: &mut String) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = Vec::new();

    while let Some(newline_pos) = buffer.find('\n') {
        let line = buffer[..newline_pos].trim_end_matches('\r');

        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                events.push(Ok(StreamEvent::End));
            } else if !payload.is_empty() {
                match serde_json::from_str::<Value>(payload) {
                    Ok(json) => {
                        match json["choices"][0]["delta"]["content"].as_str() {
                            Some(text) if !text.is_empty() => {
                                events.push(Ok(StreamEvent::Chunk(text.to_string())));
                            }
                            _ => {}
                        }
                    }
                    Err(e) if e.is_eof() => break,
                    Err(e) => events.push(Err(LlmError::ParseError(format!(
                        "SSE parse error: {e}"
                    )))),
                }
            }
        }

        buffer.drain(..=newline_pos);
    }

    events
}
