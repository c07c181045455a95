//! Incremental parser for OpenAI-style server-sent event streams.
//!
//! Bytes arrive in arbitrary slices, possibly splitting a UTF-8 sequence;
//! the parser buffers raw bytes, decodes only complete lines, and yields one
//! [`SseEvent`] per meaningful `data:` line.

use serde::Deserialize;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A non-empty content delta
    Delta(String),
    /// The model reported a finish reason
    Finished,
    /// The `[DONE]` sentinel
    Done,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(resp) => {
                    if let Some(choice) = resp.choices.into_iter().next() {
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            events.push(SseEvent::Delta(content));
                        }
                        if choice.finish_reason.is_some() {
                            events.push(SseEvent::Finished);
                        }
                    }
                }
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }

        events
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
