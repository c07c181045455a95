//! Error types for the RAGFlow domain.
//!
//! Two layers: [`CollaboratorError`] describes how a single call to the
//! retriever or generator went wrong, [`WorkflowError`] describes how a whole
//! query ended. Only the engine turns the former into the latter.

use std::time::Duration;

use thiserror::Error;

/// A failed call to an external collaborator (retriever, generator, embedder).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by collaborator, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service unavailable: {message} (status: {status_code})")]
    Unavailable { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Collaborator not configured: {0}")]
    NotConfigured(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl CollaboratorError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::Unavailable { .. }
                | Self::StreamInterrupted(_)
        )
    }

    /// Minimum wait the collaborator asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

/// Terminal failure of one query.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// The query was rejected before the workflow started.
    #[error("Invalid query: {0}")]
    Input(String),

    /// A collaborator failed in a way retrying cannot fix.
    #[error("Permanent collaborator failure: {0}")]
    Permanent(CollaboratorError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: CollaboratorError },

    /// Generation broke off after `fragments` fragments were already delivered.
    #[error("Stream interrupted after {fragments} fragments: {reason}")]
    StreamInterrupted { fragments: usize, reason: String },

    #[error("Query cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Stable machine-readable name, surfaced in API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Permanent(_) => "permanent",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::StreamInterrupted { .. } => "stream_interrupted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the caller may have seen part of the output already.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::StreamInterrupted { fragments, .. } if *fragments > 0)
    }
}
