//! Collaboration sessions: who is in a shared context and what happened there.
//!
//! Sessions are created on first reference and are never deleted by leaving;
//! only `disconnect()` clears the registry.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub event: String,
    pub payload: Value,
    /// Timestamp carried by the frame (server clock)
    pub timestamp: u64,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationSession {
    pub session_id: String,
    participants: BTreeSet<String>,
    events: Vec<SessionEvent>,
}

impl CollaborationSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            participants: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    /// Add a participant. Returns `false` if already present.
    pub fn join(&mut self, user_id: &str) -> bool {
        self.participants.insert(user_id.to_string())
    }

    /// Remove a participant. Returns `false` if absent.
    pub fn leave(&mut self, user_id: &str) -> bool {
        self.participants.remove(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.participants.contains(user_id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(String::as_str)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    fn record(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Default)]
pub struct CollaborationRegistry {
    sessions: HashMap<String, CollaborationSession>,
}

impl CollaborationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_mut(&mut self, session_id: &str) -> &mut CollaborationSession {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| CollaborationSession::new(session_id))
    }

    /// Record `user_id` as a participant, creating the session if needed.
    pub fn join(&mut self, session_id: &str, user_id: &str) -> bool {
        self.session_mut(session_id).join(user_id)
    }

    /// Drop `user_id` from the session. The session record stays.
    pub fn leave(&mut self, session_id: &str, user_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => session.leave(user_id),
            None => false,
        }
    }

    /// Apply a `collaboration_event`: the participant is added (or removed
    /// for a `leave` event) and the event is appended to the log.
    pub fn apply_event(
        &mut self,
        session_id: &str,
        participant: Option<&str>,
        event: SessionEvent,
    ) -> &CollaborationSession {
        let session = self.session_mut(session_id);
        if let Some(user) = participant {
            if event.event == "leave" {
                session.leave(user);
            } else {
                session.join(user);
            }
        }
        session.record(event);
        session
    }

    pub fn get(&self, session_id: &str) -> Option<&CollaborationSession> {
        self.sessions.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, ts: u64) -> SessionEvent {
        SessionEvent {
            event: name.to_string(),
            payload: json!({"n": ts}),
            timestamp: ts,
            sender: "conn".to_string(),
        }
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = CollaborationRegistry::new();
        assert!(registry.join("deal-42", "alice"));
        assert!(!registry.join("deal-42", "alice"));

        let session = registry.get("deal-42").unwrap();
        assert_eq!(session.participant_count(), 1);
        assert!(session.contains("alice"));
    }

    #[test]
    fn test_leave_keeps_session() {
        let mut registry = CollaborationRegistry::new();
        registry.join("s1", "alice");
        assert!(registry.leave("s1", "alice"));
        assert!(!registry.leave("s1", "alice"));
        assert!(!registry.leave("unknown", "alice"));

        let session = registry.get("s1").unwrap();
        assert_eq!(session.participant_count(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_event_creates_session_lazily() {
        let mut registry = CollaborationRegistry::new();
        let session = registry.apply_event("s9", Some("bob"), event("edit", 1));

        assert_eq!(session.session_id, "s9");
        assert!(session.contains("bob"));
        assert_eq!(session.events().len(), 1);
    }

    #[test]
    fn test_event_log_keeps_order() {
        let mut registry = CollaborationRegistry::new();
        registry.apply_event("s1", Some("bob"), event("edit", 3));
        registry.apply_event("s1", Some("bob"), event("edit", 1));
        registry.apply_event("s1", None, event("comment", 2));

        let stamps: Vec<u64> = registry.get("s1").unwrap().events().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3, 1, 2]);
        assert_eq!(registry.get("s1").unwrap().participant_count(), 1);
    }

    #[test]
    fn test_leave_event_removes_participant() {
        let mut registry = CollaborationRegistry::new();
        registry.apply_event("s1", Some("bob"), event("edit", 1));
        let session = registry.apply_event("s1", Some("bob"), event("leave", 2));

        assert!(!session.contains("bob"));
        assert_eq!(session.events().len(), 2);
    }

    #[test]
    fn test_participants_sorted() {
        let mut registry = CollaborationRegistry::new();
        registry.join("s1", "carol");
        registry.join("s1", "alice");
        let names: Vec<&str> = registry.get("s1").unwrap().participants().collect();
        assert_eq!(names, vec!["alice", "carol"]);
    }
}
