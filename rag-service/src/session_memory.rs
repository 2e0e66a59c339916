//! §4.L Session Memory: an in-memory bounded FIFO keyed by `session_id`.
//! Grounded structurally on the deleted `chunking_store::orchestrator`'s
//! batch-bounded loop pattern (bounded work per pass, evict and continue),
//! applied here to turn eviction instead of delete batching.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rag_model::{Role, Session, SessionId, Turn};

const DEFAULT_MAX_TURNS: usize = 20;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 4);

pub struct SessionMemory {
    max_turns: usize,
    max_age: Duration,
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for SessionMemory {
    fn default() -> Self {
        SessionMemory::new(DEFAULT_MAX_TURNS, DEFAULT_MAX_AGE)
    }
}

impl SessionMemory {
    pub fn new(max_turns: usize, max_age: Duration) -> Self {
        SessionMemory { max_turns, max_age, sessions: Mutex::new(HashMap::new()), next_id: std::sync::atomic::AtomicU64::new(1) }
    }

    /// Creates a fresh session id; the caller emits the §4.L `session` event.
    pub fn new_session(&self, now: DateTime<Utc>) -> SessionId {
        let n = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let id = SessionId(format!("sess-{n:08x}"));
        self.sessions.lock().unwrap().insert(id.clone(), Session::new(id.clone(), now));
        id
    }

    pub fn ensure(&self, session_id: &SessionId, now: DateTime<Utc>) {
        self.sessions.lock().unwrap().entry(session_id.clone()).or_insert_with(|| Session::new(session_id.clone(), now));
    }

    pub fn append(&self, session_id: &SessionId, role: Role, content: String, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.entry(session_id.clone()).or_insert_with(|| Session::new(session_id.clone(), now));
        session.turns.push_back(Turn { role, content, at: now });
        session.last_touched = now;
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }
    }

    /// Turns from the most recent `max_turns_requested`, oldest first,
    /// excluding any turn older than `max_age` relative to `now`.
    pub fn history(&self, session_id: &SessionId, max_turns_requested: usize, now: DateTime<Utc>) -> Vec<Turn> {
        let sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get(session_id) else { return Vec::new() };
        let cutoff = now - chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::zero());
        session
            .turns
            .iter()
            .rev()
            .filter(|t| t.at >= cutoff)
            .take(max_turns_requested.min(self.max_turns))
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Drops sessions whose last activity is older than `max_age`; called
    /// opportunistically by the orchestrator rather than on a timer.
    pub fn evict_stale(&self, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().unwrap();
        let max_age = self.max_age;
        sessions.retain(|_, s| (now - s.last_touched).to_std().map(|age| age <= max_age).unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_bounds_turn_count() {
        let mem = SessionMemory::new(2, DEFAULT_MAX_AGE);
        let now = Utc::now();
        let id = mem.new_session(now);
        mem.append(&id, Role::User, "a".into(), now);
        mem.append(&id, Role::Assistant, "b".into(), now);
        mem.append(&id, Role::User, "c".into(), now);
        let history = mem.history(&id, 10, now);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "b");
        assert_eq!(history[1].content, "c");
    }

    #[test]
    fn evict_stale_drops_old_sessions() {
        let mem = SessionMemory::new(10, Duration::from_secs(1));
        let now = Utc::now();
        let id = mem.new_session(now);
        mem.append(&id, Role::User, "a".into(), now);
        let later = now + chrono::Duration::seconds(5);
        mem.evict_stale(later);
        assert!(mem.history(&id, 10, later).is_empty());
    }
}
