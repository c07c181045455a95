//! Progress reporting for one workflow run.
//!
//! The engine reports through a [`StepReporter`], which keeps the ordered
//! step list for the turn and forwards each change to an [`EventSink`].
//! Streaming callers read the sink directly; one-shot callers fold it into
//! a [`StatusReport`] with [`StatusCollector`].

use ragflow_core::{DocumentRef, Outcome, SessionId, Step, StepState, StepStatus, WorkflowError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One progress event, in the order the workflow produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A step started, finished or failed
    Step {
        #[serde(flatten)]
        status: StepStatus,
    },

    /// Documents the decision looked at
    Documents { documents: Vec<DocumentRef> },

    /// A fragment of the answer or clarification text
    Token { content: String },

    /// Terminal: the workflow reached `Done`
    Done {
        session_id: String,
        outcome: Outcome,
        documents: Vec<DocumentRef>,
    },

    /// Terminal: the workflow reached `Failed`
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<Step>,
        kind: String,
        message: String,
        /// Tokens were already delivered before the failure
        partial: bool,
    },
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::Documents { .. } => "documents",
            Self::Token { .. } => "token",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }
}

/// Sending half of a progress stream.
///
/// A closed receiver means nobody is listening any more, which the engine
/// treats as cancellation.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<WorkflowEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: WorkflowEvent) -> Result<(), WorkflowError> {
        self.tx.send(event).await.map_err(|_| WorkflowError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Ordered step statuses for one turn, mirrored to a sink.
pub struct StepReporter {
    sink: EventSink,
    steps: Vec<StepStatus>,
    current: Option<Step>,
    tokens: usize,
}

impl StepReporter {
    pub fn new(sink: EventSink) -> Self {
        Self { sink, steps: Vec::new(), current: None, tokens: 0 }
    }

    /// Mark `step` pending and make it the current step.
    pub async fn begin(&mut self, step: Step) -> Result<(), WorkflowError> {
        self.current = Some(step);
        self.complete(StepStatus::pending(step)).await
    }

    /// Record and emit a status change.
    pub async fn complete(&mut self, status: StepStatus) -> Result<(), WorkflowError> {
        self.settle(status.clone());
        self.announce(status).await
    }

    /// Record a status without emitting it.
    pub fn settle(&mut self, status: StepStatus) {
        match self.steps.iter_mut().find(|s| s.step == status.step) {
            Some(existing) => *existing = status,
            None => self.steps.push(status),
        }
    }

    /// Emit a status that was already settled.
    pub async fn announce(&self, status: StepStatus) -> Result<(), WorkflowError> {
        self.sink.emit(WorkflowEvent::Step { status }).await
    }

    pub async fn documents(&self, documents: Vec<DocumentRef>) -> Result<(), WorkflowError> {
        self.sink.emit(WorkflowEvent::Documents { documents }).await
    }

    pub async fn token(&mut self, content: impl Into<String>) -> Result<(), WorkflowError> {
        self.sink.emit(WorkflowEvent::Token { content: content.into() }).await?;
        self.tokens += 1;
        Ok(())
    }

    pub async fn done(
        &self,
        session: &SessionId,
        outcome: Outcome,
        documents: Vec<DocumentRef>,
    ) -> Result<(), WorkflowError> {
        self.sink
            .emit(WorkflowEvent::Done { session_id: session.to_string(), outcome, documents })
            .await
    }

    /// Mark the current step failed and emit the terminal failure.
    ///
    /// Emission errors are ignored: the run is over either way.
    pub async fn fail_current(&mut self, error: &WorkflowError) {
        let step = self.current;
        if let Some(step) = step {
            let mut status = StepStatus::failed(step, error.to_string());
            if let WorkflowError::RetryExhausted { attempts, .. } = error {
                status = status.with_attempts(*attempts);
            }
            self.settle(status.clone());
            let _ = self.announce(status).await;
        }

        let failed = WorkflowEvent::Failed {
            step,
            kind: error.kind().to_string(),
            message: error.to_string(),
            partial: self.tokens > 0,
        };
        let _ = self.sink.emit(failed).await;
    }

    pub fn current(&self) -> Option<Step> {
        self.current
    }

    pub fn steps(&self) -> &[StepStatus] {
        &self.steps
    }
}

/// Aggregate result of one query, for non-streaming callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// "completed" or "error"
    pub status: String,
    pub session_id: String,
    pub steps: Vec<StepStatus>,

    /// Answer or clarification text; partial when the stream broke off
    pub answer: String,

    pub documents: Vec<DocumentRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl StatusReport {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn failed_step(&self) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.status == StepState::Failed)
    }
}

/// Folds a progress stream into a [`StatusReport`].
pub struct StatusCollector;

impl StatusCollector {
    pub async fn collect(session: &SessionId, mut rx: mpsc::Receiver<WorkflowEvent>) -> StatusReport {
        let mut report = StatusReport {
            status: "error".into(),
            session_id: session.to_string(),
            steps: Vec::new(),
            answer: String::new(),
            documents: Vec::new(),
            outcome: None,
            error: None,
            error_kind: None,
        };
        let mut terminal = false;

        while let Some(event) = rx.recv().await {
            match event {
                WorkflowEvent::Step { status } => match report.steps.iter_mut().find(|s| s.step == status.step) {
                    Some(existing) => *existing = status,
                    None => report.steps.push(status),
                },
                WorkflowEvent::Documents { documents } => report.documents = documents,
                WorkflowEvent::Token { content } => report.answer.push_str(&content),
                WorkflowEvent::Done { outcome, documents, .. } => {
                    report.status = "completed".into();
                    report.outcome = Some(outcome);
                    report.documents = documents;
                    terminal = true;
                }
                WorkflowEvent::Failed { kind, message, .. } => {
                    report.error = Some(message);
                    report.error_kind = Some(kind);
                    terminal = true;
                }
            }
        }

        if !terminal {
            let cancelled = WorkflowError::Cancelled;
            report.error = Some(cancelled.to_string());
            report.error_kind = Some(cancelled.kind().to_string());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragflow_core::CollaboratorError;

    fn drain(rx: &mut mpsc::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let step = WorkflowEvent::Step { status: StepStatus::done(Step::Retrieve).with_docs_found(3) };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step"], "retrieve");
        assert_eq!(json["status"], "done");
        assert_eq!(json["docs_found"], 3);

        let token = serde_json::to_value(WorkflowEvent::Token { content: "Hi".into() }).unwrap();
        assert_eq!(token, serde_json::json!({"type": "token", "content": "Hi"}));

        let failed = WorkflowEvent::Failed {
            step: Some(Step::Answer),
            kind: "retry_exhausted".into(),
            message: "boom".into(),
            partial: false,
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["step"], "answer");
        assert_eq!(failed.event_type(), "failed");
        assert!(failed.is_terminal());
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = WorkflowEvent::Done {
            session_id: "s1".into(),
            outcome: Outcome::Clarify,
            documents: vec![DocumentRef { source: "a.md".into(), score: 0.95, preview: None }],
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: WorkflowEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn reporter_keeps_one_entry_per_step() {
        let (sink, mut rx) = EventSink::channel(16);
        let mut reporter = StepReporter::new(sink);

        reporter.begin(Step::Retrieve).await.unwrap();
        reporter.complete(StepStatus::done(Step::Retrieve).with_docs_found(2)).await.unwrap();
        reporter.begin(Step::Decision).await.unwrap();

        let steps = reporter.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, StepState::Done);
        assert_eq!(steps[1].status, StepState::Pending);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test]
    async fn settle_does_not_emit() {
        let (sink, mut rx) = EventSink::channel(16);
        let mut reporter = StepReporter::new(sink);
        reporter.settle(StepStatus::done(Step::Answer));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(reporter.steps().len(), 1);
    }

    #[tokio::test]
    async fn fail_current_marks_step_and_emits_terminal() {
        let (sink, mut rx) = EventSink::channel(16);
        let mut reporter = StepReporter::new(sink);
        reporter.begin(Step::Answer).await.unwrap();
        reporter.token("Par").await.unwrap();

        let err = WorkflowError::StreamInterrupted { fragments: 1, reason: "closed".into() };
        reporter.fail_current(&err).await;

        assert_eq!(reporter.steps()[0].status, StepState::Failed);
        let events = drain(&mut rx);
        match events.last() {
            Some(WorkflowEvent::Failed { step, kind, partial, .. }) => {
                assert_eq!(*step, Some(Step::Answer));
                assert_eq!(kind, "stream_interrupted");
                assert!(partial);
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_records_attempts() {
        let (sink, _rx) = EventSink::channel(16);
        let mut reporter = StepReporter::new(sink);
        reporter.begin(Step::Retrieve).await.unwrap();

        let err = WorkflowError::RetryExhausted { attempts: 3, last: CollaboratorError::Network("down".into()) };
        reporter.fail_current(&err).await;
        assert_eq!(reporter.steps()[0].attempts, Some(3));
    }

    #[tokio::test]
    async fn emit_to_closed_sink_is_cancellation() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());
        let err = sink.emit(WorkflowEvent::Token { content: "x".into() }).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
    }

    #[tokio::test]
    async fn collector_builds_completed_report() {
        let (sink, rx) = EventSink::channel(16);
        let session = SessionId::from("s1");
        let docs = vec![DocumentRef { source: "doc3.md".into(), score: 0.12, preview: Some("RAG is...".into()) }];

        sink.emit(WorkflowEvent::Step { status: StepStatus::done(Step::Retrieve) }).await.unwrap();
        sink.emit(WorkflowEvent::Token { content: "RAG ".into() }).await.unwrap();
        sink.emit(WorkflowEvent::Token { content: "is...".into() }).await.unwrap();
        sink.emit(WorkflowEvent::Done { session_id: "s1".into(), outcome: Outcome::Answer, documents: docs.clone() })
            .await
            .unwrap();
        drop(sink);

        let report = StatusCollector::collect(&session, rx).await;
        assert!(report.is_completed());
        assert_eq!(report.answer, "RAG is...");
        assert_eq!(report.documents, docs);
        assert_eq!(report.outcome, Some(Outcome::Answer));
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn collector_without_terminal_event_reports_cancelled() {
        let (sink, rx) = EventSink::channel(4);
        sink.emit(WorkflowEvent::Token { content: "half".into() }).await.unwrap();
        drop(sink);

        let report = StatusCollector::collect(&SessionId::from("s"), rx).await;
        assert!(!report.is_completed());
        assert_eq!(report.error_kind.as_deref(), Some("cancelled"));
        assert_eq!(report.answer, "half");
    }
}
