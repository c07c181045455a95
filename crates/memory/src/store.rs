//! Process-wide session registry.

use std::collections::HashMap;
use std::sync::Arc;

use ragflow_core::{SessionId, Turn};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::session::Session;

/// Exclusive access to one session for the duration of a query.
pub type SessionGuard = OwnedMutexGuard<Session>;

struct Entry {
    session: Arc<Mutex<Session>>,
    last_used: u64,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<SessionId, Entry>,
    tick: u64,
}

/// Sessions keyed by id, each behind its own lock.
///
/// The registry lock is only held to look up or create an entry, never
/// while a query runs, so sessions do not block each other.
pub struct SessionStore {
    registry: Mutex<Registry>,
    max_turns: usize,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            max_turns,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Lock the session for `id`, creating it on first use.
    ///
    /// Waits while another query of the same session holds the guard.
    pub async fn acquire(&self, id: &SessionId) -> SessionGuard {
        let handle = {
            let mut registry = self.registry.lock().await;
            registry.tick += 1;
            let tick = registry.tick;
            let max_turns = self.max_turns;

            let entry = registry.entries.entry(id.clone()).or_insert_with(|| {
                tracing::debug!(session = %id, "Creating session");
                Entry {
                    session: Arc::new(Mutex::new(Session::new(id.clone(), max_turns))),
                    last_used: tick,
                }
            });
            entry.last_used = tick;
            let handle = entry.session.clone();

            self.evict_idle(&mut registry, id);
            handle
        };

        handle.lock_owned().await
    }

    /// Committed turns of a session, oldest first. Unknown sessions are empty.
    pub async fn turns(&self, id: &SessionId) -> Vec<Turn> {
        let handle = {
            let registry = self.registry.lock().await;
            match registry.entries.get(id) {
                Some(entry) => entry.session.clone(),
                None => return Vec::new(),
            }
        };
        let session = handle.lock().await;
        session.turns().cloned().collect()
    }

    /// Forget a session. Returns whether it existed.
    ///
    /// Waits for a query holding the session to finish, so its turn is
    /// cleared too. If another query is already queued on the session the
    /// entry stays registered with empty history.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let handle = {
            let registry = self.registry.lock().await;
            match registry.entries.get(id) {
                Some(entry) => entry.session.clone(),
                None => return false,
            }
        };

        let mut session = handle.lock().await;
        session.clear();

        let mut registry = self.registry.lock().await;
        let unclaimed = registry
            .entries
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.session, &handle) && Arc::strong_count(&handle) == 2);
        if unclaimed {
            registry.entries.remove(id);
        }
        tracing::debug!(session = %id, "Session cleared");
        true
    }

    pub async fn len(&self) -> usize {
        self.registry.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop least recently used sessions nobody is holding until the
    /// registry fits its bound. `keep` is never evicted.
    fn evict_idle(&self, registry: &mut Registry, keep: &SessionId) {
        while registry.entries.len() > self.max_sessions {
            let victim = registry
                .entries
                .iter()
                .filter(|(id, entry)| *id != keep && Arc::strong_count(&entry.session) == 1)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    tracing::debug!(session = %id, "Evicting idle session");
                    registry.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(20, 1000)
    }
}
