//! Session tracking service.
//!
//! Owns the pure [`SessionLifecycle`] machine and wires its events into
//! the rest of the stack: every lifecycle event goes to the durable queue,
//! progress is mirrored over the realtime channel, and the ended session
//! is finalized through the result aggregator.

use crate::queue::DurableQueue;
use crate::realtime::RealtimeClient;
use crate::results::{FinalizeOutcome, ResultAggregator};
use crate::socket::Socket;
use session_core::{LifecycleError, SessionLifecycle, SessionSnapshot};
use session_types::{HttpMethod, SessionEvent, SessionId, SpaceId, UserId};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Endpoint lifecycle events are shipped to.
const EVENTS_ENDPOINT: &str = "/api/sessions/events";

/// Errors from tracker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// The lifecycle machine rejected the operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Tracks the user's study session end to end.
pub struct SessionTracker<S> {
    lifecycle: Mutex<SessionLifecycle>,
    queue: Arc<DurableQueue>,
    realtime: Arc<RealtimeClient<S>>,
    aggregator: ResultAggregator,
    heartbeat_interval: Duration,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Socket + 'static> SessionTracker<S> {
    /// Create a tracker over the given services.
    pub fn new(
        queue: Arc<DurableQueue>,
        realtime: Arc<RealtimeClient<S>>,
        aggregator: ResultAggregator,
        heartbeat_interval_secs: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Mutex::new(SessionLifecycle::new()),
            queue,
            realtime,
            aggregator,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs.max(1)),
            heartbeat_task: Mutex::new(None),
        })
    }

    /// Start a new study session. Fails while another session is in
    /// progress; the existing session is unaffected.
    pub async fn start_session(
        self: &Arc<Self>,
        user_id: UserId,
        space_id: Option<SpaceId>,
        subject: Option<String>,
    ) -> Result<SessionId, TrackerError> {
        let (session_id, event) = self
            .lifecycle
            .lock()
            .await
            .start(user_id, space_id.clone(), subject, now_ms())?;

        info!(session = %session_id, "session started");
        self.ship(&event).await;
        self.realtime
            .mirror_session_started(session_id, space_id)
            .await;
        self.spawn_heartbeat().await;

        Ok(session_id)
    }

    /// Pause the session. Returns `false` (and ships nothing) when already
    /// on break.
    pub async fn take_break(&self) -> Result<bool, TrackerError> {
        let event = self.lifecycle.lock().await.take_break(now_ms())?;
        match event {
            Some(event) => {
                self.ship(&event).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resume from a break. Returns `false` (and ships nothing) when
    /// already active.
    pub async fn resume(&self) -> Result<bool, TrackerError> {
        let event = self.lifecycle.lock().await.resume(now_ms())?;
        match event {
            Some(event) => {
                self.ship(&event).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End the session and finalize it against the backend.
    ///
    /// The machine returns to idle before the backend is awaited: a failed
    /// finalize never resurrects the session, it only defers delivery.
    pub async fn end_session(&self) -> Result<FinalizeOutcome, TrackerError> {
        if let Some(task) = self.heartbeat_task.lock().await.take() {
            task.abort();
        }

        let ended = self.lifecycle.lock().await.end(now_ms())?;
        info!(session = %ended.session_id, elapsed_secs = ended.elapsed_secs, "session ended");

        self.ship(&ended.event).await;
        self.realtime.mirror_session_stopped(ended.session_id).await;

        Ok(self.aggregator.finalize(&ended).await)
    }

    /// Whether no session is in progress.
    pub async fn is_idle(&self) -> bool {
        self.lifecycle.lock().await.is_idle()
    }

    /// A read-only view of the current session.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.lifecycle.lock().await.snapshot(now_ms())
    }

    async fn ship(&self, event: &SessionEvent) {
        match serde_json::to_value(event) {
            Ok(body) => {
                self.queue
                    .submit(EVENTS_ENDPOINT, HttpMethod::Post, body)
                    .await
            }
            Err(e) => error!(error = %e, "failed to encode session event"),
        }
    }

    async fn spawn_heartbeat(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let interval = self.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick of an interval is immediate
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = tracker.lifecycle.lock().await.heartbeat(now_ms());
                let Ok(event) = beat else { break };
                tracker.ship(&event).await;
                tracker
                    .realtime
                    .mirror_session_progress(event.session_id, event.elapsed_secs)
                    .await;
            }
        });
        if let Some(old) = self.heartbeat_task.lock().await.replace(handle) {
            old.abort();
        }
    }
}

impl<S> std::fmt::Debug for SessionTracker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTracker")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
