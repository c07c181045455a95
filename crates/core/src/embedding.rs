//! Embedder trait — text to dense vectors.

use async_trait::async_trait;

use crate::error::CollaboratorError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier reported in index stats.
    fn model(&self) -> &str;

    /// Embed each input; the output has one vector per input, in order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError>;
}
