//! Text-generation and embedding backends for RAGFlow.
//!
//! All backends speak the OpenAI-compatible HTTP API; the provider name only
//! selects a well-known base URL.

pub mod builder;
pub mod openai_compat;
pub mod sse;

pub use builder::{build_embedder, build_generator, default_base_url};
pub use openai_compat::{OpenAiCompatEmbedder, OpenAiCompatGenerator};

/// Errors raised while constructing a backend from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ProviderBuildError {
    #[error("No API key configured for provider '{0}' (set RAGFLOW_API_KEY or generator.api_key)")]
    MissingApiKey(String),

    #[error("Failed to create HTTP client: {0}")]
    Http(String),
}
