//! Realtime connection state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! realtime channel lifecycle. The state machine takes inputs and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (opening the socket, emitting events, running timers) is
//! performed by session-client, not by this module. This enables instant
//! unit testing without network mocks.
//!
//! Invariants encoded here:
//! - `authenticated` implies `connected` (by construction of the states).
//! - The joined-space set never survives a disconnect; it is carried into
//!   `Reconnecting` once and re-established explicitly via
//!   [`Action::RejoinSpaces`] plus per-space acknowledgments.
//! - Reconnection is single-flight: a connect request while not
//!   `Disconnected` is an invalid transition and a no-op.

use std::time::Duration;

use session_types::SpaceId;

/// Reconnection attempts before the machine gives up and goes back to
/// `Disconnected`.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// Not connected.
    Disconnected,
    /// Socket connect in progress. Carries spaces to re-join after a drop.
    Connecting {
        /// Spaces to re-join once authenticated (empty on a fresh connect).
        rejoin: Vec<SpaceId>,
    },
    /// Socket open, authentication in flight.
    Connected {
        /// Spaces to re-join once authenticated.
        rejoin: Vec<SpaceId>,
    },
    /// Fully connected and authenticated.
    Authenticated {
        /// Spaces with acknowledged membership.
        joined: Vec<SpaceId>,
    },
    /// Dropped, waiting to reconnect.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
        /// Spaces that were joined before the drop.
        rejoin: Vec<SpaceId>,
    },
}

impl ConnState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an input and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller
    /// (session-client) is responsible for executing the returned actions.
    pub fn on_input(self, input: LinkInput) -> (Self, Vec<Action>) {
        match (self, input) {
            // From Disconnected
            (Self::Disconnected, LinkInput::ConnectRequested) => (
                Self::Connecting { rejoin: Vec::new() },
                vec![Action::OpenSocket],
            ),

            // From Connecting
            (Self::Connecting { rejoin }, LinkInput::ConnectSucceeded) => {
                (Self::Connected { rejoin }, vec![Action::Authenticate])
            }
            (Self::Connecting { rejoin }, LinkInput::ConnectFailed { error }) => (
                Self::Reconnecting { attempt: 1, rejoin },
                vec![
                    Action::Emit(LinkEvent::ReconnectFailed { attempt: 1, error }),
                    Action::StartReconnectTimer {
                        delay: reconnect_backoff(1),
                    },
                ],
            ),
            (Self::Connecting { .. }, LinkInput::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CloseSocket])
            }

            // From Connected (authenticating)
            (Self::Connected { rejoin }, LinkInput::AuthSucceeded) => {
                let mut actions = Vec::new();
                if !rejoin.is_empty() {
                    actions.push(Action::RejoinSpaces {
                        spaces: rejoin.clone(),
                    });
                }
                actions.push(Action::StartHeartbeat);
                actions.push(Action::Emit(LinkEvent::Connected));
                // Membership is never assumed: the joined set starts empty
                // and re-fills as SpaceJoined acknowledgments arrive.
                (Self::Authenticated { joined: Vec::new() }, actions)
            }
            (Self::Connected { .. }, LinkInput::AuthFailed { error }) => (
                Self::Disconnected,
                vec![
                    Action::CloseSocket,
                    Action::Emit(LinkEvent::AuthRejected { error }),
                ],
            ),
            (Self::Connected { rejoin }, LinkInput::ConnectionLost { reason }) => (
                Self::Reconnecting { attempt: 1, rejoin },
                vec![
                    Action::Emit(LinkEvent::Dropped { reason }),
                    Action::StartReconnectTimer {
                        delay: reconnect_backoff(1),
                    },
                ],
            ),
            (Self::Connected { .. }, LinkInput::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CloseSocket])
            }

            // From Authenticated
            (Self::Authenticated { mut joined }, LinkInput::SpaceJoined { space_id }) => {
                if !joined.contains(&space_id) {
                    joined.push(space_id);
                }
                (Self::Authenticated { joined }, vec![])
            }
            (Self::Authenticated { joined }, LinkInput::ConnectionLost { reason }) => (
                Self::Reconnecting {
                    attempt: 1,
                    rejoin: joined,
                },
                vec![
                    Action::StopHeartbeat,
                    Action::Emit(LinkEvent::Dropped { reason }),
                    Action::StartReconnectTimer {
                        delay: reconnect_backoff(1),
                    },
                ],
            ),
            (Self::Authenticated { .. }, LinkInput::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::StopHeartbeat,
                    Action::CloseSocket,
                    Action::ClearHandlers,
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { rejoin, .. }, LinkInput::ReconnectTimer) => {
                (Self::Connecting { rejoin }, vec![Action::OpenSocket])
            }
            (Self::Reconnecting { rejoin, .. }, LinkInput::ConnectSucceeded) => {
                (Self::Connected { rejoin }, vec![Action::Authenticate])
            }
            (Self::Reconnecting { attempt, rejoin }, LinkInput::ConnectFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                if next_attempt > MAX_RECONNECT_ATTEMPTS {
                    (
                        Self::Disconnected,
                        vec![
                            Action::ClearHandlers,
                            Action::Emit(LinkEvent::GaveUp { attempts: attempt }),
                        ],
                    )
                } else {
                    (
                        Self::Reconnecting {
                            attempt: next_attempt,
                            rejoin,
                        },
                        vec![
                            Action::Emit(LinkEvent::ReconnectFailed {
                                attempt: next_attempt,
                                error,
                            }),
                            Action::StartReconnectTimer {
                                delay: reconnect_backoff(next_attempt),
                            },
                        ],
                    )
                }
            }
            (Self::Reconnecting { .. }, LinkInput::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CancelReconnect])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether the socket is open (authenticated or not).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Authenticated { .. })
    }

    /// Whether the channel is fully usable for emissions.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// Acknowledged space memberships. Empty unless authenticated:
    /// membership is only trusted while connected and authenticated.
    pub fn joined_spaces(&self) -> &[SpaceId] {
        match self {
            Self::Authenticated { joined } => joined,
            _ => &[],
        }
    }
}

impl Default for ConnState {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs to the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    /// The application asked to connect.
    ConnectRequested,
    /// The socket opened.
    ConnectSucceeded,
    /// The socket failed to open.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The server acknowledged authentication.
    AuthSucceeded,
    /// The server rejected authentication.
    AuthFailed {
        /// Error message describing the rejection.
        error: String,
    },
    /// The server acknowledged a space join.
    SpaceJoined {
        /// The acknowledged space.
        space_id: SpaceId,
    },
    /// The connection dropped unexpectedly.
    ConnectionLost {
        /// Reason for the drop.
        reason: String,
    },
    /// The reconnect timer fired.
    ReconnectTimer,
    /// The application asked to disconnect.
    DisconnectRequested,
}

/// Actions to be executed by session-client.
///
/// These are instructions, not side effects. The client interprets them
/// and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the socket.
    OpenSocket,
    /// Close the socket.
    CloseSocket,
    /// Send the authenticate event.
    Authenticate,
    /// Re-join the given spaces (emit one join request per space).
    RejoinSpaces {
        /// Spaces whose membership must be re-established.
        spaces: Vec<SpaceId>,
    },
    /// Start the keep-alive heartbeat timer.
    StartHeartbeat,
    /// Stop the keep-alive heartbeat timer.
    StopHeartbeat,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Drop all registered event handlers.
    ClearHandlers,
    /// Surface an event to the application.
    Emit(LinkEvent),
}

/// Events surfaced to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Fully connected and authenticated.
    Connected,
    /// Authentication rejected; re-authentication is an external flow.
    AuthRejected {
        /// Error message from the server.
        error: String,
    },
    /// The connection dropped; reconnection is in progress.
    Dropped {
        /// Reason for the drop.
        reason: String,
    },
    /// A reconnection attempt failed.
    ReconnectFailed {
        /// Which attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// Reconnection gave up after the attempt ceiling.
    GaveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Calculate reconnection backoff with jitter.
///
/// Uses exponential backoff with random jitter to prevent thundering herd
/// when many clients reconnect simultaneously after a server restart.
///
/// Formula: min(30s, 2^attempt seconds) + random(0..5000ms)
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let base_secs = 2u64.pow(attempt.min(5)).min(30);
    let base = Duration::from_secs(base_secs);

    let jitter = Duration::from_millis(random_jitter_ms());
    base + jitter
}

/// Generate random jitter between 0 and 5000 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    let random = u64::from_le_bytes(bytes);
    random % 5001
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(id: &str) -> SpaceId {
        SpaceId::new(id)
    }

    fn authenticated_with(spaces: &[&str]) -> ConnState {
        ConnState::Authenticated {
            joined: spaces.iter().map(|s| space(s)).collect(),
        }
    }

    #[test]
    fn starts_disconnected() {
        assert!(matches!(ConnState::new(), ConnState::Disconnected));
    }

    #[test]
    fn connect_request_opens_socket() {
        let (state, actions) = ConnState::Disconnected.on_input(LinkInput::ConnectRequested);
        assert!(matches!(state, ConnState::Connecting { .. }));
        assert!(actions.iter().any(|a| matches!(a, Action::OpenSocket)));
    }

    #[test]
    fn connect_request_while_connected_is_a_no_op() {
        // Single-flight: no second connect storm.
        let state = authenticated_with(&["space-1"]);
        let (new_state, actions) = state.clone().on_input(LinkInput::ConnectRequested);
        assert_eq!(new_state, state);
        assert!(actions.is_empty());
    }

    #[test]
    fn socket_open_triggers_authentication() {
        let state = ConnState::Connecting { rejoin: Vec::new() };
        let (new_state, actions) = state.on_input(LinkInput::ConnectSucceeded);
        assert!(matches!(new_state, ConnState::Connected { .. }));
        assert!(actions.iter().any(|a| matches!(a, Action::Authenticate)));
    }

    #[test]
    fn auth_success_starts_heartbeat() {
        let state = ConnState::Connected { rejoin: Vec::new() };
        let (new_state, actions) = state.on_input(LinkInput::AuthSucceeded);

        assert!(new_state.is_authenticated());
        assert!(actions.iter().any(|a| matches!(a, Action::StartHeartbeat)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Emit(LinkEvent::Connected))));
        // Fresh connect: nothing to rejoin.
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::RejoinSpaces { .. })));
    }

    #[test]
    fn auth_failure_disconnects_and_surfaces() {
        let state = ConnState::Connected { rejoin: Vec::new() };
        let (new_state, actions) = state.on_input(LinkInput::AuthFailed {
            error: "token expired".into(),
        });

        assert!(matches!(new_state, ConnState::Disconnected));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Emit(LinkEvent::AuthRejected { .. }))));
    }

    #[test]
    fn authenticated_implies_connected() {
        let state = authenticated_with(&["space-1"]);
        assert!(state.is_connected());
        assert!(state.is_authenticated());

        let connecting = ConnState::Connecting { rejoin: Vec::new() };
        assert!(!connecting.is_connected());
        assert!(!connecting.is_authenticated());
    }

    #[test]
    fn space_joined_records_membership_once() {
        let state = ConnState::Authenticated { joined: Vec::new() };
        let (state, _) = state.on_input(LinkInput::SpaceJoined {
            space_id: space("space-1"),
        });
        let (state, _) = state.on_input(LinkInput::SpaceJoined {
            space_id: space("space-1"),
        });

        assert_eq!(state.joined_spaces(), &[space("space-1")]);
    }

    #[test]
    fn membership_is_only_trusted_while_authenticated() {
        let (dropped, _) = authenticated_with(&["space-1"]).on_input(LinkInput::ConnectionLost {
            reason: "network".into(),
        });
        assert!(dropped.joined_spaces().is_empty());
    }

    #[test]
    fn drop_carries_spaces_into_reconnect() {
        let state = authenticated_with(&["space-1", "space-2"]);
        let (new_state, actions) = state.on_input(LinkInput::ConnectionLost {
            reason: "network".into(),
        });

        match &new_state {
            ConnState::Reconnecting { attempt, rejoin } => {
                assert_eq!(*attempt, 1);
                assert_eq!(rejoin.len(), 2);
            }
            other => panic!("expected Reconnecting, got {:?}", other),
        }
        assert!(actions.iter().any(|a| matches!(a, Action::StopHeartbeat)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn reconnect_reauth_rejoins_every_space_exactly_once() {
        // Full drop-and-recover flow.
        let state = authenticated_with(&["space-1", "space-2"]);
        let (state, _) = state.on_input(LinkInput::ConnectionLost {
            reason: "network".into(),
        });
        let (state, _) = state.on_input(LinkInput::ReconnectTimer);
        let (state, _) = state.on_input(LinkInput::ConnectSucceeded);
        let (state, actions) = state.on_input(LinkInput::AuthSucceeded);

        let rejoins: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::RejoinSpaces { spaces } => Some(spaces.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(rejoins.len(), 1, "exactly one rejoin action");
        assert_eq!(rejoins[0], vec![space("space-1"), space("space-2")]);
        assert!(actions.iter().any(|a| matches!(a, Action::StartHeartbeat)));

        // Joined set starts empty until acks come back.
        assert!(state.joined_spaces().is_empty());
    }

    #[test]
    fn reconnect_failure_increments_attempt() {
        let state = ConnState::Reconnecting {
            attempt: 2,
            rejoin: vec![space("space-1")],
        };
        let (new_state, actions) = state.on_input(LinkInput::ConnectFailed {
            error: "timeout".into(),
        });

        match &new_state {
            ConnState::Reconnecting { attempt, rejoin } => {
                assert_eq!(*attempt, 3);
                assert_eq!(rejoin.len(), 1, "rejoin set survives failed attempts");
            }
            other => panic!("expected Reconnecting, got {:?}", other),
        }
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn reconnect_gives_up_at_attempt_ceiling() {
        let state = ConnState::Reconnecting {
            attempt: MAX_RECONNECT_ATTEMPTS,
            rejoin: Vec::new(),
        };
        let (new_state, actions) = state.on_input(LinkInput::ConnectFailed {
            error: "timeout".into(),
        });

        assert!(matches!(new_state, ConnState::Disconnected));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Emit(LinkEvent::GaveUp { .. }))));
    }

    #[test]
    fn disconnect_request_tears_down() {
        let state = authenticated_with(&["space-1"]);
        let (new_state, actions) = state.on_input(LinkInput::DisconnectRequested);

        assert!(matches!(new_state, ConnState::Disconnected));
        assert!(actions.iter().any(|a| matches!(a, Action::StopHeartbeat)));
        assert!(actions.iter().any(|a| matches!(a, Action::CloseSocket)));
        assert!(actions.iter().any(|a| matches!(a, Action::ClearHandlers)));
    }

    #[test]
    fn disconnect_request_while_reconnecting_cancels_timer() {
        let state = ConnState::Reconnecting {
            attempt: 2,
            rejoin: Vec::new(),
        };
        let (new_state, actions) = state.on_input(LinkInput::DisconnectRequested);

        assert!(matches!(new_state, ConnState::Disconnected));
        assert!(actions.iter().any(|a| matches!(a, Action::CancelReconnect)));
    }

    #[test]
    fn backoff_increases_with_attempt() {
        let delay1 = reconnect_backoff(1);
        let delay3 = reconnect_backoff(3);
        assert!(delay1 >= Duration::from_secs(2));
        assert!(delay3 >= Duration::from_secs(8));
    }

    #[test]
    fn backoff_capped_at_30_seconds_plus_jitter() {
        let delay = reconnect_backoff(20);
        assert!(
            delay <= Duration::from_secs(35),
            "backoff must be capped at ~35s (30s base + 5s jitter), got {:?}",
            delay
        );
    }

    #[test]
    fn backoff_jitter_creates_variance() {
        let delays: Vec<Duration> = (0..20).map(|_| reconnect_backoff(3)).collect();
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        // Probabilistic: 20 samples over 5001 jitter values.
        assert!(
            max.as_millis() - min.as_millis() >= 100,
            "expected jitter variance, got min={:?} max={:?}",
            min,
            max
        );
    }
}
