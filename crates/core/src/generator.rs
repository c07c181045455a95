//! Generator trait — the abstraction over text-generation backends.
//!
//! A Generator turns a prompt into text, either as one completed string or
//! as a stream of fragments terminated by a `done` chunk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CollaboratorError;
use crate::message::Message;

/// A prompt plus sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.4
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, temperature: default_temperature(), max_tokens: None }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A single fragment in a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), done: false }
    }

    pub fn done() -> Self {
        Self { content: None, done: true }
    }
}

/// Receiving half of a generation stream.
pub type ChunkReceiver = mpsc::Receiver<Result<StreamChunk, CollaboratorError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this generator (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Model identifier used for requests.
    fn model(&self) -> &str;

    /// Send a request and get the complete text.
    async fn complete(&self, request: GenerationRequest) -> Result<String, CollaboratorError>;

    /// Send a request and get a stream of fragments.
    ///
    /// The stream ends with a chunk whose `done` flag is set. A channel that
    /// closes before that chunk means the generation broke off. The default
    /// implementation calls `complete()` and delivers the result as one
    /// fragment followed by the terminator.
    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, CollaboratorError> {
        let text = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.send(Ok(StreamChunk::text(text))).await;
        let _ = tx.send(Ok(StreamChunk::done())).await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn complete(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
            Ok(request.messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[test]
    fn request_defaults() {
        let req = GenerationRequest::new(vec![Message::user("hi")]);
        assert!((req.temperature - 0.4).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let mut rx = Echo.stream(GenerationRequest::new(vec![Message::user("hello")])).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("hello"));
        assert!(!first.done);

        let last = rx.recv().await.unwrap().unwrap();
        assert!(last.done);
        assert!(rx.recv().await.is_none());
    }
}
