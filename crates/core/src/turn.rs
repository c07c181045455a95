//! Turns and step statuses — what one query leaves behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::{DocumentRef, ScoredChunk};

/// Workflow step names, in the order they can appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Retrieve,
    Decision,
    Answer,
    Clarify,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::Decision => "decision",
            Self::Answer => "answer",
            Self::Clarify => "clarify",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Done,
    Failed,
}

/// Progress record for one step, with step-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step: Step,
    pub status: StepState,

    /// Number of chunks the retriever returned (retrieve)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_found: Option<usize>,

    /// Whether the decision routed to clarification (decision)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarify: Option<bool>,

    /// Distance that determined the decision (decision)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_distance: Option<f32>,

    /// Collaborator attempts used by the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Failure reason (failed steps only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepStatus {
    pub fn pending(step: Step) -> Self {
        Self {
            step,
            status: StepState::Pending,
            docs_found: None,
            clarify: None,
            best_distance: None,
            attempts: None,
            error: None,
        }
    }

    pub fn done(step: Step) -> Self {
        Self { status: StepState::Done, ..Self::pending(step) }
    }

    pub fn failed(step: Step, error: impl Into<String>) -> Self {
        Self { status: StepState::Failed, error: Some(error.into()), ..Self::pending(step) }
    }

    pub fn with_docs_found(mut self, count: usize) -> Self {
        self.docs_found = Some(count);
        self
    }

    pub fn with_clarify(mut self, clarify: bool, best_distance: Option<f32>) -> Self {
        self.clarify = Some(clarify);
        self.best_distance = best_distance;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

/// Which branch the decision took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answer,
    Clarify,
}

impl Outcome {
    pub fn step(&self) -> Step {
        match self {
            Self::Answer => Step::Answer,
            Self::Clarify => Step::Clarify,
        }
    }
}

/// One completed round of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub query: String,
    pub outcome: Outcome,

    /// Chunks handed to the generator (empty for clarifications)
    pub context: Vec<ScoredChunk>,

    /// Final answer or clarification text
    pub response: String,

    pub steps: Vec<StepStatus>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        query: impl Into<String>,
        outcome: Outcome,
        context: Vec<ScoredChunk>,
        response: impl Into<String>,
        steps: Vec<StepStatus>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            outcome,
            context,
            response: response.into(),
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn documents(&self) -> Vec<DocumentRef> {
        self.context.iter().map(ScoredChunk::document_ref).collect()
    }

    pub fn is_clarification(&self) -> bool {
        self.outcome == Outcome::Clarify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_serializes_flat() {
        let status = StepStatus::done(Step::Decision).with_clarify(false, Some(0.12));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["step"], "decision");
        assert_eq!(json["status"], "done");
        assert_eq!(json["clarify"], false);
        assert!(json.get("docs_found").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_status_carries_reason() {
        let status = StepStatus::failed(Step::Retrieve, "timeout").with_attempts(3);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["attempts"], 3);
    }

    #[test]
    fn turn_documents_follow_context_order() {
        let turn = Turn::new(
            "What is RAG?",
            Outcome::Answer,
            vec![ScoredChunk::new("doc3.md", "a", 0.12), ScoredChunk::new("doc1.md", "b", 0.2)],
            "RAG is ...",
            vec![],
        );
        let sources: Vec<_> = turn.documents().into_iter().map(|d| d.source).collect();
        assert_eq!(sources, vec!["doc3.md", "doc1.md"]);
        assert!(!turn.is_clarification());
    }

    #[test]
    fn outcome_maps_to_final_step() {
        assert_eq!(Outcome::Answer.step(), Step::Answer);
        assert_eq!(Outcome::Clarify.step(), Step::Clarify);
    }
}
