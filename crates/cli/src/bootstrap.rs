//! Wiring: configuration in, a ready workflow engine out.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use ragflow_config::AppConfig;
use ragflow_core::{DomainEvent, Embedder, EventBus};
use ragflow_index::{Chunker, HashingEmbedder, VectorIndex};
use ragflow_memory::SessionStore;
use ragflow_workflow::{EngineConfig, WorkflowEngine};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Load configuration from `path`, or the default location when absent.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate().context("Invalid configuration after environment overrides")?;
            Ok(config)
        }
        None => AppConfig::load().context("Failed to load config"),
    }
}

/// Build the embedder named by `retrieval.embedder`.
pub fn build_embedder(config: &AppConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.retrieval.embedder.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimensions))),
        "openai" => ragflow_providers::build_embedder(&config.generator, &config.retrieval)
            .context("Failed to build remote embedder"),
        other => bail!("Unknown embedder '{other}' (expected \"hashing\" or \"openai\")"),
    }
}

/// Index the configured corpus.
pub async fn build_index(config: &AppConfig) -> anyhow::Result<VectorIndex> {
    let embedder = build_embedder(config)?;
    let chunker = Chunker::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap);
    let index = VectorIndex::new(embedder, chunker);

    let documents = index
        .load_dir(&config.retrieval.data_dir)
        .await
        .with_context(|| format!("Failed to index {}", config.retrieval.data_dir.display()))?;
    if documents == 0 {
        warn!(path = %config.retrieval.data_dir.display(), "No documents indexed; every query will ask for clarification");
    }
    Ok(index)
}

/// Build the full engine: corpus index, generator, session store.
pub async fn build_engine(config: &AppConfig) -> anyhow::Result<Arc<WorkflowEngine>> {
    let index = build_index(config).await?;
    let generator = ragflow_providers::build_generator(&config.generator)
        .context("Failed to build generator (run `ragflow status` to inspect configuration)")?;
    let sessions = SessionStore::new(config.memory.max_turns, config.memory.max_sessions);

    let events = Arc::new(EventBus::default());
    spawn_event_logger(&events);

    let engine = WorkflowEngine::new(
        Arc::new(index),
        generator,
        Arc::new(sessions),
        EngineConfig::from_app_config(config),
    )
    .with_event_bus(events);

    info!(
        provider = %config.generator.provider,
        model = %config.generator.model,
        threshold = config.retrieval.distance_threshold,
        top_k = config.retrieval.top_k,
        "Engine ready"
    );
    Ok(Arc::new(engine))
}

/// Mirror domain events into the debug log.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => debug!(missed, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::CallAttempted { operation, attempt, success, error, delay_ms, .. } => {
            debug!(operation = %operation, attempt, success, error = ?error, delay_ms = ?delay_ms, "Call attempted");
        }
        DomainEvent::QueryCompleted { session_id, outcome, documents, duration_ms, .. } => {
            debug!(session = %session_id, outcome = %outcome, documents, duration_ms, "Query completed event");
        }
        DomainEvent::QueryFailed { session_id, step, kind, error_message, .. } => {
            debug!(session = %session_id, step = ?step, kind = %kind, error = %error_message, "Query failed event");
        }
        DomainEvent::TurnEvicted { session_id, turn_id, .. } => {
            debug!(session = %session_id, turn = %turn_id, "Turn evicted");
        }
    }
}
