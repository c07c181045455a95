//! Domain event system — observability without coupling.
//!
//! The engine publishes events as it works. Subscribers (log shippers,
//! tests, dashboards) receive them without the engine knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// One attempt of a collaborator call finished
    CallAttempted {
        operation: String,
        attempt: u32,
        success: bool,
        error: Option<String>,
        /// Backoff before the next attempt, if one follows
        delay_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// A query reached `Done`
    QueryCompleted {
        session_id: String,
        outcome: String,
        documents: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A query reached `Failed`
    QueryFailed {
        session_id: String,
        step: Option<String>,
        kind: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The oldest turn of a session was dropped to respect the bound
    TurnEvicted {
        session_id: String,
        turn_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers lag and lose events; publishers never wait.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
