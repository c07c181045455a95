//! The query workflow: retrieve, decide, then answer or clarify.
//!
//! One call to [`WorkflowEngine::execute`] drives a query through the state
//! machine, reporting progress to an [`EventSink`] as it goes. The session
//! is locked for the whole run, so queries of one session are serialized
//! while different sessions proceed independently. A turn is committed to
//! the session only when the run reaches `Done`; failed and cancelled runs
//! leave history untouched.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ragflow_config::{AppConfig, ClarifyMode};
use ragflow_core::{
    CollaboratorError, DocumentRef, DomainEvent, EventBus, GenerationRequest, Generator, IndexStats, Outcome, Query,
    Retriever, SessionId, Step, StepStatus, TieBreak, Turn, WorkflowError,
};
use ragflow_memory::{SessionGuard, SessionStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decision::{Decision, decide};
use crate::prompt;
use crate::reporter::{EventSink, StatusCollector, StatusReport, StepReporter, WorkflowEvent};
use crate::retry::{RetryPolicy, RetryingCaller};
use crate::state::{StateMachine, WorkflowState};

/// Buffer between a running query and its event consumer.
const EVENT_BUFFER: usize = 128;

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chunks requested from the retriever
    pub fetch_k: usize,
    /// Chunks the decision considers
    pub top_k: usize,
    pub distance_threshold: f32,
    pub tie_break: TieBreak,
    pub retry: RetryPolicy,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub clarify_mode: ClarifyMode,
    pub clarify_template: String,
    pub record_clarifications: bool,
    pub clarifications_in_history: bool,
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            fetch_k: config.retrieval.fetch_k,
            top_k: config.retrieval.top_k,
            distance_threshold: config.retrieval.distance_threshold,
            tie_break: config.retrieval.tie_break,
            retry: RetryPolicy::from_config(&config.retry),
            temperature: config.generator.temperature,
            max_tokens: Some(config.generator.max_tokens),
            clarify_mode: config.clarify.mode,
            clarify_template: config.clarify.template.clone(),
            record_clarifications: config.memory.record_clarifications,
            clarifications_in_history: config.memory.clarifications_in_history,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// What a successful run hands back to `execute`.
///
/// The session stays locked until `execute` commits the turn outside the
/// cancellable section.
struct Completed {
    turn: Turn,
    documents: Vec<DocumentRef>,
    final_status: StepStatus,
    session: SessionGuard,
}

pub struct WorkflowEngine {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    sessions: Arc<SessionStore>,
    config: EngineConfig,
    caller: RetryingCaller,
    events: Arc<EventBus>,
}

impl WorkflowEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        sessions: Arc<SessionStore>,
        config: EngineConfig,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let caller = RetryingCaller::new(config.retry.clone(), events.clone());
        Self { retriever, generator, sessions, config, caller, events }
    }

    /// Publish domain events on `events` instead of a private bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.caller = RetryingCaller::new(self.config.retry.clone(), events.clone());
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn generator_model(&self) -> &str {
        self.generator.model()
    }

    pub async fn index_stats(&self) -> IndexStats {
        self.retriever.stats().await
    }

    /// Committed turns of a session, oldest first.
    pub async fn history(&self, session: &SessionId) -> Vec<Turn> {
        self.sessions.turns(session).await
    }

    /// Forget a session's history. Returns whether it existed.
    pub async fn reset_session(&self, session: &SessionId) -> bool {
        self.sessions.remove(session).await
    }

    /// Run one query to completion, failure, or cancellation.
    ///
    /// Every run ends with exactly one terminal event on `sink` (unless the
    /// consumer has gone away). Cancellation only takes effect before the
    /// final step settles; once the turn is committed the run reports `done`
    /// even if `cancel` fires while the last events are being delivered.
    /// The committed turn is returned on success.
    pub async fn execute(&self, query: &Query, sink: EventSink, cancel: CancellationToken) -> Result<Turn, WorkflowError> {
        let started = Instant::now();
        let mut machine = StateMachine::new();
        let mut reporter = StepReporter::new(sink);

        info!(session = %query.session(), query = %query.preview(), "Processing query");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
            result = self.run(query, &mut machine, &mut reporter) => result,
        };

        match result {
            Ok(Completed { turn, documents, final_status, session }) => {
                self.commit(query, session, &turn);
                machine.advance(WorkflowState::Done);

                // The turn is committed; a vanished consumer no longer matters
                let document_count = documents.len();
                let _ = reporter.announce(final_status).await;
                let _ = reporter.done(query.session(), turn.outcome, documents).await;

                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    session = %query.session(),
                    outcome = turn.outcome.step().as_str(),
                    documents = document_count,
                    duration_ms,
                    "Query completed"
                );
                self.events.publish(DomainEvent::QueryCompleted {
                    session_id: query.session().to_string(),
                    outcome: turn.outcome.step().as_str().to_string(),
                    documents: document_count,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(turn)
            }
            Err(error) => {
                machine.fail();
                let step = reporter.current();
                reporter.fail_current(&error).await;

                warn!(
                    session = %query.session(),
                    step = step.map(|s| s.as_str()),
                    kind = error.kind(),
                    error = %error,
                    "Query failed"
                );
                self.events.publish(DomainEvent::QueryFailed {
                    session_id: query.session().to_string(),
                    step: step.map(|s| s.as_str().to_string()),
                    kind: error.kind().to_string(),
                    error_message: error.to_string(),
                    timestamp: Utc::now(),
                });
                Err(error)
            }
        }
    }

    /// Run a query in the background and return its event stream.
    ///
    /// The stream ends after the terminal event.
    pub fn stream(self: &Arc<Self>, query: Query, cancel: CancellationToken) -> mpsc::Receiver<WorkflowEvent> {
        let (sink, rx) = EventSink::channel(EVENT_BUFFER);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _ = engine.execute(&query, sink, cancel).await;
        });
        rx
    }

    /// Run a query and fold its events into one report.
    pub async fn ask(&self, query: &Query, cancel: CancellationToken) -> StatusReport {
        let (sink, rx) = EventSink::channel(EVENT_BUFFER);
        let (_, report) = tokio::join!(
            self.execute(query, sink, cancel),
            StatusCollector::collect(query.session(), rx)
        );
        report
    }

    async fn run(
        &self,
        query: &Query,
        machine: &mut StateMachine,
        reporter: &mut StepReporter,
    ) -> Result<Completed, WorkflowError> {
        let session = self.sessions.acquire(query.session()).await;
        let history = session.history(self.config.clarifications_in_history);

        // Retrieve
        machine.advance(WorkflowState::Retrieving);
        reporter.begin(Step::Retrieve).await?;
        let retriever = &self.retriever;
        let (text, fetch_k) = (query.text(), self.config.fetch_k);
        let retrieved = self.caller.call("retrieve", || retriever.retrieve(text, fetch_k)).await?;
        debug!(chunks = retrieved.value.len(), attempts = retrieved.attempts, "Retrieved chunks");
        reporter
            .complete(
                StepStatus::done(Step::Retrieve)
                    .with_docs_found(retrieved.value.len())
                    .with_attempts(retrieved.attempts),
            )
            .await?;

        // Decide
        machine.advance(WorkflowState::Deciding);
        reporter.begin(Step::Decision).await?;
        let decision = decide(
            &retrieved.value,
            self.config.distance_threshold,
            self.config.top_k,
            self.config.tie_break,
        );
        info!(
            best_distance = ?decision.best_distance,
            threshold = self.config.distance_threshold,
            clarify = decision.is_clarify(),
            context = decision.context.len(),
            "Decision made"
        );
        let documents = decision.documents();
        reporter.documents(documents.clone()).await?;
        reporter
            .complete(StepStatus::done(Step::Decision).with_clarify(decision.is_clarify(), decision.best_distance))
            .await?;

        // Answer or clarify
        let (response, final_status) = match decision.outcome {
            Outcome::Answer => {
                machine.advance(WorkflowState::Answering);
                reporter.begin(Step::Answer).await?;
                self.answer(query, &decision, &history, reporter).await?
            }
            Outcome::Clarify => {
                machine.advance(WorkflowState::Clarifying);
                reporter.begin(Step::Clarify).await?;
                self.clarify(query, &decision, reporter).await?
            }
        };

        reporter.settle(final_status.clone());
        let turn = Turn::new(query.text(), decision.outcome, decision.context, response, reporter.steps().to_vec());
        Ok(Completed { turn, documents, final_status, session })
    }

    /// Append a finished turn to its session and release the session.
    fn commit(&self, query: &Query, mut session: SessionGuard, turn: &Turn) {
        if turn.is_clarification() && !self.config.record_clarifications {
            debug!(session = %query.session(), "Clarification not recorded");
        } else if let Some(evicted) = session.push(turn.clone()) {
            debug!(session = %query.session(), turn = %evicted.id, "Evicted oldest turn");
            self.events.publish(DomainEvent::TurnEvicted {
                session_id: query.session().to_string(),
                turn_id: evicted.id,
                timestamp: Utc::now(),
            });
        }
    }

    async fn answer(
        &self,
        query: &Query,
        decision: &Decision,
        history: &[Turn],
        reporter: &mut StepReporter,
    ) -> Result<(String, StepStatus), WorkflowError> {
        let request = GenerationRequest::new(prompt::answer_messages(query.text(), &decision.context, history))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        // An attempt covers opening the stream and receiving its first chunk
        let generator = &self.generator;
        let opened = self
            .caller
            .call("generate", || {
                let request = request.clone();
                async move {
                    let mut rx = generator.stream(request).await?;
                    match rx.recv().await {
                        Some(Ok(first)) => Ok((rx, first)),
                        Some(Err(e)) => Err(e),
                        None => Err(CollaboratorError::StreamInterrupted("stream closed before first fragment".into())),
                    }
                }
            })
            .await?;

        let attempts = opened.attempts;
        let (mut rx, first) = opened.value;
        let gap = self.caller.policy().attempt_timeout;
        let mut answer = String::new();
        let mut fragments = 0usize;
        let mut pending = Some(first);

        loop {
            let chunk = match pending.take() {
                Some(chunk) => chunk,
                None => match tokio::time::timeout(gap, rx.recv()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => return Err(interrupted(fragments, e.to_string())),
                    Ok(None) => return Err(interrupted(fragments, "stream closed before completion")),
                    Err(_) => return Err(interrupted(fragments, format!("no fragment within {gap:?}"))),
                },
            };

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                reporter.token(text.as_str()).await?;
                answer.push_str(&text);
                fragments += 1;
            }
            if chunk.done {
                break;
            }
        }

        debug!(fragments, chars = answer.len(), "Answer generated");
        Ok((answer, StepStatus::done(Step::Answer).with_attempts(attempts)))
    }

    async fn clarify(
        &self,
        query: &Query,
        decision: &Decision,
        reporter: &mut StepReporter,
    ) -> Result<(String, StepStatus), WorkflowError> {
        let from_template =
            || prompt::render_template(&self.config.clarify_template, query.text(), decision.best_distance);

        let (text, attempts) = match self.config.clarify_mode {
            ClarifyMode::Template => (from_template(), None),
            ClarifyMode::Generate => {
                let request = GenerationRequest::new(prompt::clarification_messages(query.text(), decision.best_distance))
                    .with_temperature(self.config.temperature)
                    .with_max_tokens(self.config.max_tokens);
                let generator = &self.generator;
                match self.caller.call("clarify", || generator.complete(request.clone())).await {
                    Ok(done) if !done.value.trim().is_empty() => (done.value.trim().to_string(), Some(done.attempts)),
                    Ok(done) => {
                        warn!(attempts = done.attempts, "Generator returned an empty clarification, using template");
                        (from_template(), Some(done.attempts))
                    }
                    Err(e) => {
                        warn!(error = %e, "Clarification generation failed, using template");
                        (from_template(), None)
                    }
                }
            }
        };

        reporter.token(text.as_str()).await?;
        let mut status = StepStatus::done(Step::Clarify);
        if let Some(attempts) = attempts {
            status = status.with_attempts(attempts);
        }
        Ok((text, status))
    }
}

fn interrupted(fragments: usize, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::StreamInterrupted { fragments, reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fragment, ScriptedGenerator, ScriptedRetriever};
    use ragflow_core::{Role, ScoredChunk, StepState};
    use std::time::Duration;

    fn chunk(source: &str, distance: f32) -> ScoredChunk {
        ScoredChunk::new(source, format!("Contents of {source}"), distance)
    }

    fn config() -> EngineConfig {
        EngineConfig { distance_threshold: 0.3, top_k: 2, ..EngineConfig::default() }
    }

    fn engine_with(
        retriever: Arc<ScriptedRetriever>,
        generator: Arc<ScriptedGenerator>,
        config: EngineConfig,
    ) -> WorkflowEngine {
        WorkflowEngine::new(retriever, generator, Arc::new(SessionStore::new(20, 100)), config)
    }

    fn query(text: &str, session: &str) -> Query {
        Query::new(text, SessionId::from(session)).unwrap()
    }

    async fn run(engine: &WorkflowEngine, q: &Query) -> (Result<Turn, WorkflowError>, Vec<WorkflowEvent>) {
        let (sink, mut rx) = EventSink::channel(256);
        let result = engine.execute(q, sink, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        (result, events)
    }

    fn tokens(events: &[WorkflowEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::Token { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn answers_from_relevant_context() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12), chunk("doc1.md", 0.41)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["RAG ", "combines retrieval ", "and generation."]));
        let engine = engine_with(retriever, generator.clone(), config());

        let q = query("What is RAG?", "s1");
        let (result, events) = run(&engine, &q).await;
        let turn = result.unwrap();

        assert_eq!(turn.outcome, Outcome::Answer);
        assert_eq!(turn.response, "RAG combines retrieval and generation.");
        let sources: Vec<_> = turn.documents().into_iter().map(|d| d.source).collect();
        assert_eq!(sources, vec!["doc3.md"]);
        assert_eq!(tokens(&events), "RAG combines retrieval and generation.");

        // Only the relevant chunk reaches the prompt
        let request = generator.last_request().unwrap();
        assert!(request.messages[0].content.contains("doc3.md"));
        assert!(!request.messages[0].content.contains("doc1.md"));

        match events.last() {
            Some(WorkflowEvent::Done { outcome, documents, session_id }) => {
                assert_eq!(*outcome, Outcome::Answer);
                assert_eq!(documents.len(), 1);
                assert_eq!(session_id, "s1");
            }
            other => panic!("Expected Done, got {other:?}"),
        }
        assert_eq!(engine.history(q.session()).await.len(), 1);
    }

    #[tokio::test]
    async fn steps_are_reported_in_order() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["ok"]));
        let engine = engine_with(retriever, generator, config());

        let (result, events) = run(&engine, &query("What is RAG?", "s1")).await;
        let turn = result.unwrap();

        let kinds: Vec<&str> = events.iter().map(WorkflowEvent::event_type).collect();
        assert_eq!(
            kinds,
            vec!["step", "step", "step", "documents", "step", "step", "token", "step", "done"]
        );

        // No token before the decision is done
        let decision_done = events
            .iter()
            .position(|e| matches!(e, WorkflowEvent::Step { status } if status.step == Step::Decision && status.status == StepState::Done))
            .unwrap();
        let first_token = events.iter().position(|e| matches!(e, WorkflowEvent::Token { .. })).unwrap();
        assert!(decision_done < first_token);

        let steps: Vec<(Step, StepState)> = turn.steps.iter().map(|s| (s.step, s.status)).collect();
        assert_eq!(
            steps,
            vec![
                (Step::Retrieve, StepState::Done),
                (Step::Decision, StepState::Done),
                (Step::Answer, StepState::Done),
            ]
        );
        assert_eq!(turn.steps[0].docs_found, Some(1));
        assert_eq!(turn.steps[1].clarify, Some(false));
    }

    #[tokio::test]
    async fn empty_retrieval_asks_for_clarification() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![]));
        let generator = Arc::new(ScriptedGenerator::answering(&["never"]));
        let engine = engine_with(retriever, generator.clone(), config());

        let (result, events) = run(&engine, &query("quantum soup recipes", "s1")).await;
        let turn = result.unwrap();

        assert!(turn.is_clarification());
        assert!(turn.context.is_empty());
        assert!(turn.response.contains("quantum soup recipes"));
        assert!(turn.response.contains("n/a"));
        assert_eq!(generator.stream_calls(), 0);
        assert_eq!(generator.complete_calls(), 0);
        assert!(matches!(events.last(), Some(WorkflowEvent::Done { outcome: Outcome::Clarify, .. })));
    }

    #[tokio::test]
    async fn distant_chunks_clarify_and_report_considered_documents() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("a.md", 0.95), chunk("b.md", 1.2)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["never"]));
        let engine = engine_with(retriever, generator.clone(), config());

        let (result, events) = run(&engine, &query("unrelated", "s1")).await;
        let turn = result.unwrap();

        assert!(turn.is_clarification());
        assert!(turn.response.contains("0.950"));
        assert_eq!(generator.stream_calls(), 0);
        match events.last() {
            Some(WorkflowEvent::Done { documents, .. }) => assert_eq!(documents.len(), 2),
            other => panic!("Expected Done, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrieval_exhaustion_fails_without_commit() {
        let retriever = Arc::new(ScriptedRetriever::failing(CollaboratorError::Network("index offline".into())));
        let generator = Arc::new(ScriptedGenerator::answering(&["never"]));
        let engine = engine_with(retriever.clone(), generator.clone(), config());

        let q = query("What is RAG?", "s1");
        let (result, events) = run(&engine, &q).await;

        assert!(matches!(result, Err(WorkflowError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(retriever.call_count(), 3);
        assert_eq!(generator.stream_calls(), 0);
        assert!(engine.history(q.session()).await.is_empty());

        match events.last() {
            Some(WorkflowEvent::Failed { step, kind, partial, .. }) => {
                assert_eq!(*step, Some(Step::Retrieve));
                assert_eq!(kind, "retry_exhausted");
                assert!(!partial);
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::Done { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn generation_retries_transient_open_failure() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(CollaboratorError::Unavailable { status_code: 503, message: "busy".into() }),
            Ok(vec![Fragment::text("Recovered."), Fragment::Done]),
        ]));
        let engine = engine_with(retriever, generator.clone(), config());

        let (result, events) = run(&engine, &query("What is RAG?", "s1")).await;
        let turn = result.unwrap();

        assert_eq!(generator.stream_calls(), 2);
        assert_eq!(turn.response, "Recovered.");
        assert_eq!(turn.steps[2].attempts, Some(2));
        assert_eq!(tokens(&events), "Recovered.");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_generation_failure_is_not_retried() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(CollaboratorError::AuthenticationFailed(
            "invalid key".into(),
        ))]));
        let engine = engine_with(retriever, generator.clone(), config());

        let (result, events) = run(&engine, &query("What is RAG?", "s1")).await;

        assert!(matches!(result, Err(WorkflowError::Permanent(_))));
        assert_eq!(generator.stream_calls(), 1);
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::Failed { step: Some(Step::Answer), kind, .. }) if kind == "permanent"
        ));
    }

    #[tokio::test]
    async fn mid_stream_failure_is_partial_and_not_committed() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(vec![
            Fragment::text("Partial "),
            Fragment::text("answer"),
            Fragment::Fail(CollaboratorError::Network("connection reset".into())),
        ])]));
        let engine = engine_with(retriever, generator.clone(), config());

        let q = query("What is RAG?", "s1");
        let (result, events) = run(&engine, &q).await;

        assert!(matches!(result, Err(WorkflowError::StreamInterrupted { fragments: 2, .. })));
        assert_eq!(generator.stream_calls(), 1);
        assert_eq!(tokens(&events), "Partial answer");
        assert!(matches!(events.last(), Some(WorkflowEvent::Failed { partial: true, .. })));
        assert!(engine.history(q.session()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(vec![Fragment::text("Half"), Fragment::Hang])]));
        let engine = engine_with(retriever, generator, config());

        let (result, _) = run(&engine, &query("What is RAG?", "s1")).await;
        assert!(matches!(result, Err(WorkflowError::StreamInterrupted { fragments: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_without_commit_and_releases_session() {
        let retriever =
            Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]).with_delay(Duration::from_secs(10)));
        let generator = Arc::new(ScriptedGenerator::answering(&["ok"]));
        let engine = engine_with(retriever, generator, config());
        let q = query("What is RAG?", "s1");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let (sink, mut rx) = EventSink::channel(64);
        let result = engine.execute(&q, sink, cancel).await;
        assert!(matches!(result, Err(WorkflowError::Cancelled)));

        let mut last = None;
        while let Ok(e) = rx.try_recv() {
            last = Some(e);
        }
        assert!(matches!(last, Some(WorkflowEvent::Failed { kind, .. }) if kind == "cancelled"));
        assert!(engine.history(q.session()).await.is_empty());

        // The session lock was released
        let (result, _) = run(&engine, &q).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_after_commit_still_reports_done() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["ok"]));
        let engine = engine_with(retriever, generator, config());
        let q = query("What is RAG?", "s1");

        // Seven events fit, so the run parks on the final answer status
        let (sink, mut rx) = EventSink::channel(7);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let mut kinds = Vec::new();
            while let Some(e) = rx.recv().await {
                kinds.push(e.event_type());
            }
            kinds
        });

        let result = engine.execute(&q, sink, cancel).await;
        let kinds = reader.await.unwrap();

        assert!(result.is_ok(), "result: {result:?}");
        assert_eq!(engine.history(q.session()).await.len(), 1);
        assert_eq!(kinds.last(), Some(&"done"));
        assert!(!kinds.contains(&"failed"));
    }

    #[tokio::test]
    async fn follow_up_sees_prior_turns() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok(vec![Fragment::text("RAG is retrieval plus generation."), Fragment::Done]),
            Ok(vec![Fragment::text("Because it grounds answers."), Fragment::Done]),
        ]));
        let engine = engine_with(retriever, generator.clone(), config());

        run(&engine, &query("What is RAG?", "s1")).await.0.unwrap();
        run(&engine, &query("Why use it?", "s1")).await.0.unwrap();

        let request = generator.last_request().unwrap();
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.messages[1].content, "What is RAG?");
        assert_eq!(request.messages[2].content, "RAG is retrieval plus generation.");

        // A different session starts clean
        run(&engine, &query("What is RAG?", "s2")).await.0.unwrap();
        assert_eq!(generator.last_request().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn unrecorded_clarifications_leave_history_empty() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![]));
        let generator = Arc::new(ScriptedGenerator::answering(&[]));
        let engine = engine_with(retriever, generator, EngineConfig { record_clarifications: false, ..config() });

        let q = query("anything", "s1");
        assert!(run(&engine, &q).await.0.unwrap().is_clarification());
        assert!(engine.history(q.session()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn generated_clarification_falls_back_to_template() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![]));
        let generator = Arc::new(
            ScriptedGenerator::answering(&[])
                .with_completions(vec![Err(CollaboratorError::InvalidRequest("bad".into()))]),
        );
        let engine = engine_with(
            retriever,
            generator.clone(),
            EngineConfig { clarify_mode: ClarifyMode::Generate, clarify_template: "Rephrase {query}?".into(), ..config() },
        );

        let turn = run(&engine, &query("soup", "s1")).await.0.unwrap();
        assert_eq!(turn.response, "Rephrase soup?");
        assert_eq!(generator.complete_calls(), 1);
    }

    #[tokio::test]
    async fn generated_clarification_uses_generator_text() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("far.md", 2.0)]));
        let generator = Arc::new(
            ScriptedGenerator::answering(&[]).with_completions(vec![Ok(" Which recipe do you mean? ".into())]),
        );
        let engine =
            engine_with(retriever, generator.clone(), EngineConfig { clarify_mode: ClarifyMode::Generate, ..config() });

        let turn = run(&engine, &query("soup", "s1")).await.0.unwrap();
        assert_eq!(turn.response, "Which recipe do you mean?");
        assert_eq!(turn.steps[2].attempts, Some(1));
    }

    #[tokio::test]
    async fn full_session_evicts_oldest_turn() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["ok"]));
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let engine = WorkflowEngine::new(retriever, generator, Arc::new(SessionStore::new(2, 10)), config())
            .with_event_bus(events);

        for q in ["one", "two", "three"] {
            run(&engine, &query(q, "s1")).await.0.unwrap();
        }

        let history = engine.history(&SessionId::from("s1")).await;
        let queries: Vec<_> = history.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["two", "three"]);

        let mut evicted = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), DomainEvent::TurnEvicted { .. }) {
                evicted += 1;
            }
        }
        assert_eq!(evicted, 1);
    }

    #[tokio::test]
    async fn same_session_queries_are_serialized() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["ok"]));
        let engine = Arc::new(engine_with(retriever, generator, config()));

        let (first, second) = (query("first", "shared"), query("second", "shared"));
        let a = engine.ask(&first, CancellationToken::new());
        let b = engine.ask(&second, CancellationToken::new());
        let (ra, rb) = tokio::join!(a, b);

        assert!(ra.is_completed() && rb.is_completed());
        assert_eq!(engine.history(&SessionId::from("shared")).await.len(), 2);
    }

    #[tokio::test]
    async fn ask_collects_a_report() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12), chunk("doc1.md", 0.41)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["RAG ", "is..."]));
        let engine = engine_with(retriever, generator, config());

        let report = engine.ask(&query("What is RAG?", "s1"), CancellationToken::new()).await;
        assert!(report.is_completed());
        assert_eq!(report.answer, "RAG is...");
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.outcome, Some(Outcome::Answer));
        assert_eq!(report.steps.len(), 3);
    }

    #[tokio::test]
    async fn whitespace_in_answer_is_kept_everywhere() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok(vec![Fragment::text(" RAG "), Fragment::text("is \n"), Fragment::Done]),
            Ok(vec![Fragment::text(" RAG "), Fragment::text("is \n"), Fragment::Done]),
        ]));
        let engine = Arc::new(engine_with(retriever, generator, config()));

        let mut rx = engine.stream(query("What is RAG?", "streamed"), CancellationToken::new());
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        let streamed = tokens(&events);

        let report = engine.ask(&query("What is RAG?", "reported"), CancellationToken::new()).await;
        let turn = engine.history(&SessionId::from("reported")).await.pop().unwrap();

        assert_eq!(streamed, " RAG is \n");
        assert_eq!(report.answer, streamed);
        assert_eq!(turn.response, streamed);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_event() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["a", "b"]));
        let engine = Arc::new(engine_with(retriever, generator, config()));

        let mut rx = engine.stream(query("What is RAG?", "s1"), CancellationToken::new());
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(tokens(&events), "ab");
    }

    #[tokio::test]
    async fn reset_session_forgets_history() {
        let retriever = Arc::new(ScriptedRetriever::always(vec![chunk("doc3.md", 0.12)]));
        let generator = Arc::new(ScriptedGenerator::answering(&["ok"]));
        let engine = engine_with(retriever, generator, config());
        let q = query("What is RAG?", "s1");

        run(&engine, &q).await.0.unwrap();
        assert!(engine.reset_session(q.session()).await);
        assert!(engine.history(q.session()).await.is_empty());
        assert!(!engine.reset_session(q.session()).await);
    }
}
