//! Session lifecycle events.
//!
//! A [`SessionEvent`] is an immutable fact about a session: created on every
//! lifecycle transition and on a fixed interval while the session is active,
//! shipped to the backend by the durable queue, and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::SessionId;

/// The phase of a study session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Actively studying; heartbeats are emitted.
    Active,
    /// On a break; the clock is paused.
    Break,
    /// Terminal; the session is being finalized.
    Ended,
}

/// What kind of fact a [`SessionEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// Session was created.
    Start,
    /// Periodic liveness/progress signal while active.
    Heartbeat,
    /// Session went on break (also emitted by interval ticks during a break).
    Pause,
    /// Session resumed from a break.
    Resume,
    /// Session ended.
    End,
}

/// An immutable, append-only fact about one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// The session this event belongs to.
    pub session_id: SessionId,
    /// What happened.
    pub kind: SessionEventKind,
    /// Phase of the session after this event.
    pub phase: SessionPhase,
    /// Accumulated active duration at event time, in seconds.
    pub elapsed_secs: u64,
    /// Client wall-clock timestamp, milliseconds since the Unix epoch.
    pub client_timestamp_ms: u64,
}

impl SessionEvent {
    /// Create a new event. `now_ms` doubles as the creation timestamp;
    /// events are ordered by it within a session.
    pub fn new(
        session_id: SessionId,
        kind: SessionEventKind,
        phase: SessionPhase,
        elapsed_secs: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            session_id,
            kind,
            phase,
            elapsed_secs,
            client_timestamp_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_uses_snake_case_tags() {
        let event = SessionEvent::new(
            SessionId::new(),
            SessionEventKind::Heartbeat,
            SessionPhase::Active,
            30,
            1_705_000_000_000,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "heartbeat");
        assert_eq!(json["phase"], "active");
        assert_eq!(json["elapsed_secs"], 30);
    }

    #[test]
    fn event_roundtrip() {
        let event = SessionEvent::new(
            SessionId::new(),
            SessionEventKind::End,
            SessionPhase::Ended,
            3600,
            1_705_000_000_000,
        );
        let json = serde_json::to_string(&event).unwrap();
        let restored: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn events_order_by_timestamp() {
        let id = SessionId::new();
        let earlier = SessionEvent::new(id, SessionEventKind::Start, SessionPhase::Active, 0, 100);
        let later =
            SessionEvent::new(id, SessionEventKind::Heartbeat, SessionPhase::Active, 10, 200);
        assert!(earlier.client_timestamp_ms < later.client_timestamp_ms);
    }
}
