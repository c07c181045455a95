//! Workflow engine — retrieve, decide, then answer or clarify.
//!
//! A query moves through a fixed state machine:
//! `Start → Retrieving → Deciding → (Answering | Clarifying) → Done`, with
//! `Failed` reachable from every non-terminal state. Collaborator calls are
//! wrapped in bounded retries, progress is reported as ordered events, and a
//! turn is committed to its session only when the query completes.

pub mod decision;
pub mod engine;
pub mod prompt;
pub mod reporter;
pub mod retry;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use decision::{Decision, decide};
pub use engine::{EngineConfig, WorkflowEngine};
pub use reporter::{EventSink, StatusCollector, StatusReport, StepReporter, WorkflowEvent};
pub use retry::{Attempted, RetryPolicy, RetryingCaller};
pub use state::{InvalidTransition, StateMachine, WorkflowState};
