//! Workflow state machine.
//!
//! `Start → Retrieving → Deciding → (Answering | Clarifying) → Done`, with
//! `Failed` reachable from every non-terminal state. No cycles.

use ragflow_core::Step;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Start,
    Retrieving,
    Deciding,
    Answering,
    Clarifying,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Start, Retrieving)
            | (Retrieving, Deciding)
            | (Deciding, Answering)
            | (Deciding, Clarifying)
            | (Answering, Done)
            | (Clarifying, Done) => true,
            _ => false,
        }
    }

    /// The reported step active in this state.
    pub fn step(self) -> Option<Step> {
        match self {
            Self::Retrieving => Some(Step::Retrieve),
            Self::Deciding => Some(Step::Decision),
            Self::Answering => Some(Step::Answer),
            Self::Clarifying => Some(Step::Clarify),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal workflow transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

/// Tracks the current state and the path taken.
#[derive(Debug, Clone)]
pub struct StateMachine {
    path: Vec<WorkflowState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self { path: vec![WorkflowState::Start] }
    }

    pub fn current(&self) -> WorkflowState {
        self.path.last().copied().unwrap_or(WorkflowState::Start)
    }

    pub fn path(&self) -> &[WorkflowState] {
        &self.path
    }

    pub fn try_advance(&mut self, next: WorkflowState) -> Result<(), InvalidTransition> {
        let from = self.current();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        debug!(from = ?from, to = ?next, "Workflow transition");
        self.path.push(next);
        Ok(())
    }

    /// Advance along an edge the engine's control flow guarantees is legal.
    pub fn advance(&mut self, next: WorkflowState) {
        if let Err(e) = self.try_advance(next) {
            debug_assert!(false, "{e}");
            tracing::error!(error = %e, "Workflow state machine violated");
        }
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.path.push(WorkflowState::Failed);
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
