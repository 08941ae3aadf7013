//! Realtime channel client.
//!
//! Drives the pure [`ConnState`] machine over a [`Socket`], executing the
//! actions it emits: opening and closing the socket, authenticating,
//! re-joining spaces after a drop, running the keep-alive heartbeat, and
//! scheduling reconnection with backoff.
//!
//! Incoming server events are delivered to the [`EventBus`]; the
//! application drives delivery by calling [`RealtimeClient::poll_event`]
//! in a loop.

use crate::bus::{EventBus, SubscriptionId};
use crate::config::RealtimeConfig;
use crate::socket::Socket;
use session_core::{Action, ConnState, LinkEvent, LinkInput};
use session_types::{ClientEvent, ServerEvent, ServerEventKind, SessionId, SpaceId, UserId};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct Identity {
    user_id: UserId,
    token: String,
}

/// Client for the live presence/activity channel.
///
/// All emissions are best-effort: the durable queue, not this channel,
/// protects session state.
pub struct RealtimeClient<S> {
    socket: Arc<S>,
    bus: EventBus,
    config: RealtimeConfig,
    state: Mutex<ConnState>,
    identity: Mutex<Option<Identity>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Socket + 'static> RealtimeClient<S> {
    /// Create a client over the given socket.
    pub fn new(socket: S, config: RealtimeConfig) -> Arc<Self> {
        Arc::new(Self {
            socket: Arc::new(socket),
            bus: EventBus::new(),
            config,
            state: Mutex::new(ConnState::new()),
            identity: Mutex::new(None),
            heartbeat: Mutex::new(None),
            reconnect: Mutex::new(None),
        })
    }

    /// Connect and authenticate. Resolves `true` once the server has
    /// acknowledged authentication, `false` on timeout, rejection, or
    /// failure. A connect while already connected is a no-op that reports
    /// the current status.
    pub async fn connect(self: &Arc<Self>, user_id: UserId, token: impl Into<String>) -> bool {
        {
            let mut state = self.state.lock().await;
            let (next, actions) = state.clone().on_input(LinkInput::ConnectRequested);
            if !actions.iter().any(|a| matches!(a, Action::OpenSocket)) {
                debug!("connect requested while not disconnected, ignoring");
                return state.is_authenticated();
            }
            *state = next;
        }
        *self.identity.lock().await = Some(Identity {
            user_id,
            token: token.into(),
        });
        self.open_and_authenticate().await
    }

    /// Tear down the connection, stop the heartbeat, and drop every
    /// registered handler.
    pub async fn disconnect(self: &Arc<Self>) {
        let actions = self.apply(LinkInput::DisconnectRequested).await;
        self.execute(actions).await;
    }

    /// Request membership in a space. Resolves `true` on the server's
    /// acknowledgment, `false` on timeout, a mismatched acknowledgment, or
    /// when not authenticated.
    pub async fn join_space(&self, space_id: &SpaceId) -> bool {
        let Some(identity) = self.identity.lock().await.clone() else {
            return false;
        };
        if !self.is_authenticated().await {
            debug!(space = %space_id, "join requested while not authenticated");
            return false;
        }

        let sent = self
            .emit_event(&ClientEvent::JoinSpace {
                space_id: space_id.clone(),
                user_id: identity.user_id,
            })
            .await;
        if !sent {
            return false;
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.join_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Ok(received) = tokio::time::timeout(remaining, self.socket.recv()).await else {
                debug!(space = %space_id, "join acknowledgment timed out");
                return false;
            };
            let Ok(bytes) = received else {
                return false;
            };
            let Ok(event) = ServerEvent::from_bytes(&bytes) else {
                continue;
            };

            if let ServerEvent::SpaceJoined { space_id: acked } = &event {
                let matched = acked == space_id;
                self.record_space_joined(acked.clone()).await;
                self.bus.publish(&event);
                return matched;
            }
            self.bus.publish(&event);
        }
    }

    /// Receive and dispatch one server event. Returns the event, or `None`
    /// when nothing usable arrived. A receive failure starts the
    /// reconnection flow.
    pub async fn poll_event(self: &Arc<Self>) -> Option<ServerEvent> {
        if !self.state.lock().await.is_connected() {
            return None;
        }
        match self.socket.recv().await {
            Ok(bytes) => match ServerEvent::from_bytes(&bytes) {
                Ok(event) => {
                    if let ServerEvent::SpaceJoined { space_id } = &event {
                        self.record_space_joined(space_id.clone()).await;
                    }
                    self.bus.publish(&event);
                    Some(event)
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed server event");
                    None
                }
            },
            Err(e) => {
                let actions = self
                    .apply(LinkInput::ConnectionLost {
                        reason: e.to_string(),
                    })
                    .await;
                self.execute(actions).await;
                None
            }
        }
    }

    /// Send a chat message to a space. Best-effort; a no-op when not
    /// authenticated.
    pub async fn send_message(&self, space_id: &SpaceId, body: impl Into<String>) {
        let Some(identity) = self.authenticated_identity().await else {
            return;
        };
        self.emit_event(&ClientEvent::SendMessage {
            space_id: space_id.clone(),
            user_id: identity.user_id,
            body: body.into(),
        })
        .await;
    }

    /// Broadcast an activity update. Best-effort; a no-op when not
    /// authenticated.
    pub async fn update_activity(&self, activity: serde_json::Value) {
        let Some(identity) = self.authenticated_identity().await else {
            return;
        };
        self.emit_event(&ClientEvent::UpdateActivity {
            user_id: identity.user_id,
            activity,
        })
        .await;
    }

    /// Mirror a session start to space members. Best-effort.
    pub async fn mirror_session_started(&self, session_id: SessionId, space_id: Option<SpaceId>) {
        let Some(identity) = self.authenticated_identity().await else {
            return;
        };
        self.emit_event(&ClientEvent::SessionStarted {
            session_id,
            user_id: identity.user_id,
            space_id,
        })
        .await;
    }

    /// Mirror session progress to space members. Best-effort.
    pub async fn mirror_session_progress(&self, session_id: SessionId, elapsed_secs: u64) {
        let Some(identity) = self.authenticated_identity().await else {
            return;
        };
        self.emit_event(&ClientEvent::SessionProgress {
            session_id,
            user_id: identity.user_id,
            elapsed_secs,
        })
        .await;
    }

    /// Mirror a session stop to space members. Best-effort.
    pub async fn mirror_session_stopped(&self, session_id: SessionId) {
        let Some(identity) = self.authenticated_identity().await else {
            return;
        };
        self.emit_event(&ClientEvent::SessionStopped {
            session_id,
            user_id: identity.user_id,
        })
        .await;
    }

    /// Subscribe to a kind of server event.
    pub fn on<F>(&self, kind: ServerEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, handler)
    }

    /// Remove a subscription.
    pub fn off(&self, subscription: SubscriptionId) {
        self.bus.off(subscription);
    }

    /// Whether the socket is open.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_connected()
    }

    /// Whether the channel is authenticated and usable.
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.is_authenticated()
    }

    /// Spaces with acknowledged membership.
    pub async fn joined_spaces(&self) -> Vec<SpaceId> {
        self.state.lock().await.joined_spaces().to_vec()
    }

    async fn authenticated_identity(&self) -> Option<Identity> {
        if !self.is_authenticated().await {
            return None;
        }
        self.identity.lock().await.clone()
    }

    async fn apply(&self, input: LinkInput) -> Vec<Action> {
        let mut state = self.state.lock().await;
        let (next, actions) = state.clone().on_input(input);
        *state = next;
        actions
    }

    async fn record_space_joined(&self, space_id: SpaceId) {
        let actions = self.apply(LinkInput::SpaceJoined { space_id }).await;
        debug_assert!(actions.is_empty());
    }

    /// Open the socket and run the authentication handshake. Expects the
    /// state machine to be in `Connecting`.
    async fn open_and_authenticate(self: &Arc<Self>) -> bool {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let opened =
            tokio::time::timeout(connect_timeout, self.socket.connect(&self.config.url)).await;

        let error = match opened {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("connect timed out".to_string()),
        };
        if let Some(error) = error {
            let actions = self.apply(LinkInput::ConnectFailed { error }).await;
            self.execute(actions).await;
            return false;
        }

        let actions = self.apply(LinkInput::ConnectSucceeded).await;
        if !actions.iter().any(|a| matches!(a, Action::Authenticate)) {
            return false;
        }

        let Some(identity) = self.identity.lock().await.clone() else {
            return false;
        };
        let sent = self
            .emit_event(&ClientEvent::Authenticate {
                user_id: identity.user_id,
                token: identity.token,
            })
            .await;
        if !sent {
            let actions = self
                .apply(LinkInput::ConnectionLost {
                    reason: "authenticate emit failed".to_string(),
                })
                .await;
            self.execute(actions).await;
            return false;
        }

        self.await_auth_ack().await
    }

    /// Wait for the server's verdict on the authenticate event. Events
    /// that arrive in the meantime are dispatched normally.
    async fn await_auth_ack(self: &Arc<Self>) -> bool {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.auth_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let received = tokio::time::timeout(remaining, self.socket.recv()).await;

            let failure = match received {
                Ok(Ok(bytes)) => match ServerEvent::from_bytes(&bytes) {
                    Ok(ServerEvent::Authenticated) => {
                        let actions = self.apply(LinkInput::AuthSucceeded).await;
                        self.execute(actions).await;
                        return true;
                    }
                    Ok(ServerEvent::AuthError { message }) => {
                        let actions = self.apply(LinkInput::AuthFailed { error: message }).await;
                        self.execute(actions).await;
                        return false;
                    }
                    Ok(other) => {
                        self.bus.publish(&other);
                        continue;
                    }
                    Err(_) => continue,
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => "authentication timed out".to_string(),
            };

            let actions = self.apply(LinkInput::ConnectionLost { reason: failure }).await;
            self.execute(actions).await;
            return false;
        }
    }

    /// Execute the actions the state machine emitted. `OpenSocket` and
    /// `Authenticate` are handled inline by the handshake and are skipped
    /// here.
    async fn execute(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::OpenSocket | Action::Authenticate => {}
                Action::CloseSocket => {
                    let _ = self.socket.close().await;
                }
                Action::RejoinSpaces { spaces } => {
                    let Some(identity) = self.identity.lock().await.clone() else {
                        continue;
                    };
                    for space_id in spaces {
                        info!(space = %space_id, "re-joining space after reconnect");
                        self.emit_event(&ClientEvent::JoinSpace {
                            space_id,
                            user_id: identity.user_id.clone(),
                        })
                        .await;
                    }
                }
                Action::StartHeartbeat => self.start_heartbeat().await,
                Action::StopHeartbeat => self.stop_heartbeat().await,
                Action::StartReconnectTimer { delay } => self.schedule_reconnect(delay).await,
                Action::CancelReconnect => {
                    if let Some(handle) = self.reconnect.lock().await.take() {
                        handle.abort();
                    }
                }
                Action::ClearHandlers => self.bus.clear(),
                Action::Emit(event) => match event {
                    LinkEvent::Connected => info!("realtime channel connected"),
                    LinkEvent::AuthRejected { error } => {
                        warn!(error, "realtime authentication rejected")
                    }
                    LinkEvent::Dropped { reason } => {
                        warn!(reason, "realtime connection dropped, reconnecting")
                    }
                    LinkEvent::ReconnectFailed { attempt, error } => {
                        debug!(attempt, error, "reconnect attempt failed")
                    }
                    LinkEvent::GaveUp { attempts } => {
                        warn!(attempts, "reconnection gave up")
                    }
                },
            }
        }
    }

    async fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.reconnect_attempt().await;
        });
        if let Some(old) = self.reconnect.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// One timed reconnect attempt. Boxed because the handshake can
    /// schedule the next attempt, making the future type recursive.
    fn reconnect_attempt(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let actions = self.apply(LinkInput::ReconnectTimer).await;
            if actions.iter().any(|a| matches!(a, Action::OpenSocket)) {
                self.open_and_authenticate().await;
            }
        })
    }

    async fn start_heartbeat(self: &Arc<Self>) {
        let Some(identity) = self.identity.lock().await.clone() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the first beat waits a full period
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = ClientEvent::Heartbeat {
                    user_id: identity.user_id.clone(),
                    timestamp_ms: now_ms(),
                };
                match beat.to_bytes() {
                    Ok(bytes) => {
                        let _ = socket.emit(&bytes).await;
                    }
                    Err(e) => error!(error = %e, "failed to encode heartbeat"),
                }
            }
        });
        if let Some(old) = self.heartbeat.lock().await.replace(handle) {
            old.abort();
        }
    }

    async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
    }

    async fn emit_event(&self, event: &ClientEvent) -> bool {
        let bytes = match event.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode client event");
                return false;
            }
        };
        match self.socket.emit(&bytes).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "emit failed");
                false
            }
        }
    }
}

impl<S> std::fmt::Debug for RealtimeClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.config.url)
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
