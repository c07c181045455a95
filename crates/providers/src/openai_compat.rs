//! OpenAI-compatible generator and embedder.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, Groq, Together AI, and any
//! endpoint exposing `/chat/completions` and `/embeddings`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Embeddings

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ragflow_core::generator::ChunkReceiver;
use ragflow_core::{CollaboratorError, Embedder, GenerationRequest, Generator, Message, Role, StreamChunk};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sse::{SseEvent, SseParser};
use crate::ProviderBuildError;

const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 5;

/// An OpenAI-compatible text-generation backend.
pub struct OpenAiCompatGenerator {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatGenerator {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderBuildError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client()?,
        })
    }

    /// Create an OpenRouter generator (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderBuildError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, model)
    }

    /// Create an Ollama generator (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, ProviderBuildError> {
        // Ollama ignores the key
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), "ollama", model)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value, accept_sse: bool) -> Result<reqwest::Response, CollaboratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if accept_sse {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(map_transport)?;
        check_status(response).await
    }
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        debug!(provider = %self.name, model = %self.model, "Sending completion request");
        let response = self.post(&self.request_body(&request, false), false).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidRequest(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::Unavailable {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, CollaboratorError> {
        debug!(provider = %self.name, model = %self.model, "Sending streaming request");
        let response = self.post(&self.request_body(&request, true), true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward fragments
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::new();
            let mut finished = false;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(CollaboratorError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                for event in parser.push(&bytes) {
                    match event {
                        SseEvent::Delta(content) => {
                            if tx.send(Ok(StreamChunk::text(content))).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseEvent::Finished => finished = true,
                        SseEvent::Done => {
                            let _ = tx.send(Ok(StreamChunk::done())).await;
                            return;
                        }
                    }
                }
            }

            if finished {
                let _ = tx.send(Ok(StreamChunk::done())).await;
            } else {
                warn!(provider = %provider_name, "Stream closed before completion");
                let _ = tx
                    .send(Err(CollaboratorError::StreamInterrupted(
                        "connection closed before the model finished".into(),
                    )))
                    .await;
            }
        });

        Ok(rx)
    }
}

/// Embeddings through an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiCompatEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderBuildError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client()?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiCompatEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "encoding_format": "float",
        });

        debug!(model = %self.model, count = inputs.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let response = check_status(response).await?;

        let api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| {
            CollaboratorError::InvalidRequest(format!("Failed to parse embedding response: {e}"))
        })?;

        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);
        let mut vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        for v in vectors.iter_mut() {
            normalize(v);
        }
        Ok(vectors)
    }
}

fn http_client() -> Result<reqwest::Client, ProviderBuildError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ProviderBuildError::Http(e.to_string()))
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Convert our Message types to OpenAI API format.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: match m.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
                Role::System => "system".into(),
            },
            content: Some(m.content.clone()),
        })
        .collect()
}

fn map_transport(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout(e.to_string())
    } else {
        CollaboratorError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    warn!(status, body = %body, "Provider returned error");
    Err(map_status(status, body, retry_after))
}

/// Classify an HTTP error status.
///
/// 429 and 408/5xx are transient, everything else in 4xx is permanent.
pub(crate) fn map_status(status: u16, body: String, retry_after: Option<u64>) -> CollaboratorError {
    match status {
        429 => CollaboratorError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS),
        },
        401 | 403 => CollaboratorError::AuthenticationFailed("Invalid API key or insufficient permissions".into()),
        408 | 500..=599 => CollaboratorError::Unavailable { status_code: status, message: body },
        _ => CollaboratorError::InvalidRequest(format!("status {status}: {body}")),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
