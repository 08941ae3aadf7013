//! Session lifecycle state machine.
//!
//! Pure machine for one user's study session:
//! `idle → active ⇄ break → ended → idle`.
//!
//! No clocks, no timers: every operation takes `now_ms` as an argument and
//! returns the [`SessionEvent`]s to ship. The caller (session-client) owns
//! the heartbeat interval and hands each emitted event to the durable queue.
//!
//! Invariants:
//! - At most one session may be non-idle; `start` while a session exists is
//!   rejected and the existing session is unaffected.
//! - Elapsed time accumulates only while `active`; breaks do not count.
//! - Transitions into the current phase are no-ops (no duplicate events).

use session_types::{SessionEvent, SessionEventKind, SessionId, SessionPhase, SpaceId, UserId};
use thiserror::Error;

/// Errors from lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A session is already active or on break.
    #[error("session {0} is already in progress")]
    AlreadyActive(SessionId),

    /// No session exists to operate on.
    #[error("no session in progress")]
    NoSession,
}

/// A read-only view of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// The session id.
    pub session_id: SessionId,
    /// The owning user.
    pub user_id: UserId,
    /// The space the session happens in, if any.
    pub space_id: Option<SpaceId>,
    /// Optional subject label.
    pub subject: Option<String>,
    /// Current phase.
    pub phase: SessionPhase,
    /// Accumulated active duration in seconds, as of the given instant.
    pub elapsed_secs: u64,
}

/// The outcome of ending a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedSession {
    /// The ended session.
    pub session_id: SessionId,
    /// Its owner.
    pub user_id: UserId,
    /// The space it happened in, if any.
    pub space_id: Option<SpaceId>,
    /// Final accumulated active duration in seconds.
    pub elapsed_secs: u64,
    /// The `end` event to ship.
    pub event: SessionEvent,
}

#[derive(Debug, Clone)]
struct Inner {
    session_id: SessionId,
    user_id: UserId,
    space_id: Option<SpaceId>,
    subject: Option<String>,
    phase: SessionPhase,
    accumulated_active_ms: u64,
    /// Set while the phase is `Active`; the start of the current active run.
    active_since_ms: Option<u64>,
}

impl Inner {
    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let running = self
            .active_since_ms
            .map(|since| now_ms.saturating_sub(since))
            .unwrap_or(0);
        self.accumulated_active_ms + running
    }

    fn elapsed_secs(&self, now_ms: u64) -> u64 {
        self.elapsed_ms(now_ms) / 1000
    }
}

/// Owns the lifecycle of at most one study session.
#[derive(Debug, Clone, Default)]
pub struct SessionLifecycle {
    current: Option<Inner>,
}

impl SessionLifecycle {
    /// Create an idle lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session is in progress (active or on break).
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// The current session, if any.
    pub fn snapshot(&self, now_ms: u64) -> Option<SessionSnapshot> {
        self.current.as_ref().map(|inner| SessionSnapshot {
            session_id: inner.session_id,
            user_id: inner.user_id.clone(),
            space_id: inner.space_id.clone(),
            subject: inner.subject.clone(),
            phase: inner.phase,
            elapsed_secs: inner.elapsed_secs(now_ms),
        })
    }

    /// Start a new session. Only valid from idle.
    pub fn start(
        &mut self,
        user_id: UserId,
        space_id: Option<SpaceId>,
        subject: Option<String>,
        now_ms: u64,
    ) -> Result<(SessionId, SessionEvent), LifecycleError> {
        if let Some(existing) = &self.current {
            return Err(LifecycleError::AlreadyActive(existing.session_id));
        }

        let session_id = SessionId::new();
        self.current = Some(Inner {
            session_id,
            user_id,
            space_id,
            subject,
            phase: SessionPhase::Active,
            accumulated_active_ms: 0,
            active_since_ms: Some(now_ms),
        });

        let event = SessionEvent::new(
            session_id,
            SessionEventKind::Start,
            SessionPhase::Active,
            0,
            now_ms,
        );
        Ok((session_id, event))
    }

    /// Emit a periodic liveness event.
    ///
    /// Emits `Heartbeat` while active, `Pause` while on break; both carry
    /// the accumulated active duration.
    pub fn heartbeat(&self, now_ms: u64) -> Result<SessionEvent, LifecycleError> {
        let inner = self.current.as_ref().ok_or(LifecycleError::NoSession)?;
        let kind = match inner.phase {
            SessionPhase::Active => SessionEventKind::Heartbeat,
            SessionPhase::Break => SessionEventKind::Pause,
            SessionPhase::Ended => return Err(LifecycleError::NoSession),
        };
        Ok(SessionEvent::new(
            inner.session_id,
            kind,
            inner.phase,
            inner.elapsed_secs(now_ms),
            now_ms,
        ))
    }

    /// Transition `active → break`. Returns `Ok(None)` if already on break.
    pub fn take_break(&mut self, now_ms: u64) -> Result<Option<SessionEvent>, LifecycleError> {
        let inner = self.current.as_mut().ok_or(LifecycleError::NoSession)?;
        if inner.phase == SessionPhase::Break {
            return Ok(None);
        }

        if let Some(since) = inner.active_since_ms.take() {
            inner.accumulated_active_ms += now_ms.saturating_sub(since);
        }
        inner.phase = SessionPhase::Break;

        Ok(Some(SessionEvent::new(
            inner.session_id,
            SessionEventKind::Pause,
            SessionPhase::Break,
            inner.elapsed_secs(now_ms),
            now_ms,
        )))
    }

    /// Transition `break → active`. Returns `Ok(None)` if already active.
    pub fn resume(&mut self, now_ms: u64) -> Result<Option<SessionEvent>, LifecycleError> {
        let inner = self.current.as_mut().ok_or(LifecycleError::NoSession)?;
        if inner.phase == SessionPhase::Active {
            return Ok(None);
        }

        inner.phase = SessionPhase::Active;
        inner.active_since_ms = Some(now_ms);

        Ok(Some(SessionEvent::new(
            inner.session_id,
            SessionEventKind::Resume,
            SessionPhase::Active,
            inner.elapsed_secs(now_ms),
            now_ms,
        )))
    }

    /// End the session. Valid from `active` or `break`.
    ///
    /// Clears the machine back to idle; finalization (the backend call) is
    /// the caller's job and its failure must not resurrect the session.
    pub fn end(&mut self, now_ms: u64) -> Result<EndedSession, LifecycleError> {
        let mut inner = self.current.take().ok_or(LifecycleError::NoSession)?;

        if let Some(since) = inner.active_since_ms.take() {
            inner.accumulated_active_ms += now_ms.saturating_sub(since);
        }
        let elapsed_secs = inner.accumulated_active_ms / 1000;

        let event = SessionEvent::new(
            inner.session_id,
            SessionEventKind::End,
            SessionPhase::Ended,
            elapsed_secs,
            now_ms,
        );

        Ok(EndedSession {
            session_id: inner.session_id,
            user_id: inner.user_id,
            space_id: inner.space_id,
            elapsed_secs,
            event,
        })
    }
}
