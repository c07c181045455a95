//! Retriever trait — the similarity-search collaborator.

use async_trait::async_trait;

use crate::chunk::{IndexStats, ScoredChunk};
use crate::error::CollaboratorError;

/// Similarity search over a chunked corpus.
///
/// Implementations return at most `k` chunks ordered by ascending distance,
/// ties kept in corpus order.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// A human-readable name for this retriever (e.g., "local-index").
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, CollaboratorError>;

    /// Size of the underlying index.
    async fn stats(&self) -> IndexStats;
}
