//! A single conversation session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use ragflow_core::{SessionId, Turn};

/// Ordered turns of one conversation, most recent last.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    turns: VecDeque<Turn>,
    max_turns: usize,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, max_turns: usize) -> Self {
        Self {
            id,
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Append a committed turn, evicting the oldest when full.
    ///
    /// Returns the evicted turn, if any.
    pub fn push(&mut self, turn: Turn) -> Option<Turn> {
        let evicted = if self.turns.len() >= self.max_turns {
            self.turns.pop_front()
        } else {
            None
        };
        self.turns.push_back(turn);
        evicted
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Turns that feed later prompts, oldest first.
    pub fn history(&self, include_clarifications: bool) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|t| include_clarifications || !t.is_clarification())
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragflow_core::{Outcome, ScoredChunk};

    fn answer(q: &str) -> Turn {
        Turn::new(q, Outcome::Answer, vec![ScoredChunk::new("doc.md", "ctx", 0.1)], format!("re: {q}"), vec![])
    }

    fn clarify(q: &str) -> Turn {
        Turn::new(q, Outcome::Clarify, vec![], "Could you rephrase?", vec![])
    }

    #[test]
    fn keeps_turns_in_order() {
        let mut session = Session::new(SessionId::from("s"), 10);
        for q in ["one", "two", "three"] {
            session.push(answer(q));
        }
        let queries: Vec<_> = session.turns().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["one", "two", "three"]);
        assert_eq!(session.last().unwrap().query, "three");
    }

    #[test]
    fn evicts_oldest_first() {
        let mut session = Session::new(SessionId::from("s"), 2);
        assert!(session.push(answer("one")).is_none());
        assert!(session.push(answer("two")).is_none());
        let evicted = session.push(answer("three")).unwrap();

        assert_eq!(evicted.query, "one");
        assert_eq!(session.len(), 2);
        let queries: Vec<_> = session.turns().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["two", "three"]);
    }

    #[test]
    fn history_can_skip_clarifications() {
        let mut session = Session::new(SessionId::from("s"), 10);
        session.push(answer("a"));
        session.push(clarify("b"));
        session.push(answer("c"));

        assert_eq!(session.history(true).len(), 3);
        let filtered: Vec<_> = session.history(false).into_iter().map(|t| t.query).collect();
        assert_eq!(filtered, vec!["a", "c"]);
    }

    #[test]
    fn zero_bound_still_keeps_latest() {
        let mut session = Session::new(SessionId::from("s"), 0);
        session.push(answer("a"));
        session.push(answer("b"));
        assert_eq!(session.len(), 1);
        assert_eq!(session.last().unwrap().query, "b");
    }

    #[test]
    fn clear_empties_session() {
        let mut session = Session::new(SessionId::from("s"), 5);
        session.push(answer("a"));
        session.clear();
        assert!(session.is_empty());
    }
}
