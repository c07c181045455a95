//! Query and session identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated question bound to a session.
///
/// Construction is the only validation point: a `Query` that exists has
/// non-blank text, so the engine never sees an empty question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    session: SessionId,
}

impl Query {
    /// Upper bound on question length, in characters.
    pub const MAX_CHARS: usize = 8_000;

    pub fn new(text: impl Into<String>, session: SessionId) -> Result<Self, WorkflowError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(WorkflowError::Input("query must not be empty".into()));
        }
        if trimmed.chars().count() > Self::MAX_CHARS {
            return Err(WorkflowError::Input(format!(
                "query exceeds {} characters",
                Self::MAX_CHARS
            )));
        }
        if session.as_str().trim().is_empty() {
            return Err(WorkflowError::Input("session id must not be empty".into()));
        }
        Ok(Self { text: trimmed.to_string(), session })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Short form for log lines.
    pub fn preview(&self) -> String {
        let mut preview: String = self.text.chars().take(50).collect();
        if self.text.chars().count() > 50 {
            preview.push_str("...");
        }
        preview
    }
}
