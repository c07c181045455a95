//! Build backends from configuration.

use std::sync::Arc;

use ragflow_config::{GeneratorConfig, RetrievalConfig};
use ragflow_core::{Embedder, Generator};
use tracing::info;

use crate::openai_compat::{OpenAiCompatEmbedder, OpenAiCompatGenerator};
use crate::ProviderBuildError;

/// Well-known base URL for a provider name.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

/// Providers that serve from the local machine and need no key.
fn is_local(provider_name: &str) -> bool {
    matches!(provider_name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

fn resolve_key(config: &GeneratorConfig) -> Result<String, ProviderBuildError> {
    match (&config.api_key, is_local(&config.provider)) {
        (Some(key), _) => Ok(key.clone()),
        (None, true) => Ok(config.provider.clone()),
        (None, false) => Err(ProviderBuildError::MissingApiKey(config.provider.clone())),
    }
}

/// Build the configured generator.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>, ProviderBuildError> {
    let base_url = config.base_url.clone().unwrap_or_else(|| default_base_url(&config.provider));
    let api_key = resolve_key(config)?;

    info!(provider = %config.provider, model = %config.model, base_url = %base_url, "Generator configured");
    let generator = OpenAiCompatGenerator::new(&config.provider, base_url, api_key, &config.model)?;
    Ok(Arc::new(generator))
}

/// Build the remote embedder for `retrieval.embedder = "openai"`.
///
/// Uses the generator provider's endpoint and credentials.
pub fn build_embedder(
    generator: &GeneratorConfig,
    retrieval: &RetrievalConfig,
) -> Result<Arc<dyn Embedder>, ProviderBuildError> {
    let base_url = generator.base_url.clone().unwrap_or_else(|| default_base_url(&generator.provider));
    let api_key = resolve_key(generator)?;

    info!(model = %retrieval.embedding_model, base_url = %base_url, "Remote embedder configured");
    let embedder = OpenAiCompatEmbedder::new(base_url, api_key, &retrieval.embedding_model)?;
    Ok(Arc::new(embedder))
}
