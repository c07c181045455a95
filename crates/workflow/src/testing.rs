//! Scripted collaborators for exercising the engine without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ragflow_core::generator::ChunkReceiver;
use ragflow_core::{
    CollaboratorError, GenerationRequest, Generator, IndexStats, Retriever, ScoredChunk, StreamChunk,
};
use tokio::sync::mpsc;

/// Pops one scripted item per call; the last item repeats once the queue is empty.
struct Script<T: Clone> {
    queue: Mutex<VecDeque<T>>,
    last: Mutex<Option<T>>,
}

impl<T: Clone> Script<T> {
    fn new(items: Vec<T>) -> Self {
        Self { queue: Mutex::new(items.into()), last: Mutex::new(None) }
    }

    fn next(&self) -> Option<T> {
        let popped = self.queue.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(item) = popped {
            *last = Some(item);
        }
        last.clone()
    }
}

/// A retriever that returns scripted results in order.
pub struct ScriptedRetriever {
    script: Script<Result<Vec<ScoredChunk>, CollaboratorError>>,
    delay: Option<Duration>,
    calls: Mutex<usize>,
}

impl ScriptedRetriever {
    pub fn new(results: Vec<Result<Vec<ScoredChunk>, CollaboratorError>>) -> Self {
        Self { script: Script::new(results), delay: None, calls: Mutex::new(0) }
    }

    /// Always return `chunks`.
    pub fn always(chunks: Vec<ScoredChunk>) -> Self {
        Self::new(vec![Ok(chunks)])
    }

    /// Always fail with `error`.
    pub fn failing(error: CollaboratorError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn retrieve(&self, _query: &str, k: usize) -> Result<Vec<ScoredChunk>, CollaboratorError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.script.next().unwrap_or_else(|| Ok(Vec::new()));
        result.map(|mut chunks| {
            chunks.truncate(k);
            chunks
        })
    }

    async fn stats(&self) -> IndexStats {
        IndexStats::new(1, 1, "scripted")
    }
}

/// One step of a scripted generation stream.
#[derive(Debug, Clone)]
pub enum Fragment {
    Text(String),
    /// Terminator chunk
    Done,
    /// Deliver an error through the stream
    Fail(CollaboratorError),
    /// Keep the stream open without sending anything
    Hang,
}

impl Fragment {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A generator whose streams and completions follow a script.
pub struct ScriptedGenerator {
    streams: Script<Result<Vec<Fragment>, CollaboratorError>>,
    completions: Script<Result<String, CollaboratorError>>,
    stream_calls: Mutex<usize>,
    complete_calls: Mutex<usize>,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(streams: Vec<Result<Vec<Fragment>, CollaboratorError>>) -> Self {
        Self {
            streams: Script::new(streams),
            completions: Script::new(Vec::new()),
            stream_calls: Mutex::new(0),
            complete_calls: Mutex::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Stream `tokens` and terminate cleanly.
    pub fn answering(tokens: &[&str]) -> Self {
        let mut fragments: Vec<Fragment> = tokens.iter().map(|t| Fragment::text(t)).collect();
        fragments.push(Fragment::Done);
        Self::new(vec![Ok(fragments)])
    }

    pub fn with_completions(mut self, completions: Vec<Result<String, CollaboratorError>>) -> Self {
        self.completions = Script::new(completions);
        self
    }

    pub fn stream_calls(&self) -> usize {
        *self.stream_calls.lock().unwrap()
    }

    pub fn complete_calls(&self) -> usize {
        *self.complete_calls.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        *self.complete_calls.lock().unwrap() += 1;
        *self.last_request.lock().unwrap() = Some(request);
        self.completions
            .next()
            .unwrap_or_else(|| Err(CollaboratorError::NotConfigured("no scripted completion".into())))
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, CollaboratorError> {
        *self.stream_calls.lock().unwrap() += 1;
        *self.last_request.lock().unwrap() = Some(request);
        let fragments = self.streams.next().unwrap_or_else(|| Ok(vec![Fragment::Done]))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for fragment in fragments {
                let item = match fragment {
                    Fragment::Text(text) => Ok(StreamChunk::text(text)),
                    Fragment::Done => Ok(StreamChunk::done()),
                    Fragment::Fail(e) => Err(e),
                    Fragment::Hang => {
                        // Hold the sender until the receiver goes away
                        tx.closed().await;
                        return;
                    }
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
