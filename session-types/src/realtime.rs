//! Realtime channel events.
//!
//! These are the JSON payloads exchanged over the live presence/activity
//! channel. They are best-effort signals: losing one must never corrupt
//! session state, which is protected by the durable queue instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SessionId, SpaceId, UserId, WireError};

/// Events emitted by the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Authenticate the freshly opened connection.
    Authenticate {
        /// The connecting user.
        user_id: UserId,
        /// Bearer token from the identity provider.
        token: String,
    },
    /// Request membership in a shared study space.
    JoinSpace {
        /// The space to join.
        space_id: SpaceId,
        /// The joining user.
        user_id: UserId,
    },
    /// Chat message to a space.
    SendMessage {
        /// Target space.
        space_id: SpaceId,
        /// Sender.
        user_id: UserId,
        /// Message body.
        body: String,
    },
    /// Activity status update (e.g. current subject).
    UpdateActivity {
        /// The user whose activity changed.
        user_id: UserId,
        /// Free-form activity payload.
        activity: Value,
    },
    /// Realtime mirror: a session started.
    SessionStarted {
        /// The new session.
        session_id: SessionId,
        /// Its owner.
        user_id: UserId,
        /// The space it happens in, if any.
        space_id: Option<SpaceId>,
    },
    /// Realtime mirror: session progress.
    SessionProgress {
        /// The session.
        session_id: SessionId,
        /// Its owner.
        user_id: UserId,
        /// Accumulated active duration in seconds.
        elapsed_secs: u64,
    },
    /// Realtime mirror: a session stopped.
    SessionStopped {
        /// The session.
        session_id: SessionId,
        /// Its owner.
        user_id: UserId,
    },
    /// Periodic keep-alive, emitted while authenticated.
    Heartbeat {
        /// The connected user.
        user_id: UserId,
        /// Client timestamp, milliseconds since the Unix epoch.
        timestamp_ms: u64,
    },
}

impl ClientEvent {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// Events delivered by the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The connection is authenticated.
    Authenticated,
    /// Authentication was rejected.
    AuthError {
        /// Reason for rejection.
        message: String,
    },
    /// Acknowledgment of a join request.
    SpaceJoined {
        /// The space that was joined.
        space_id: SpaceId,
    },
    /// Another user joined a space we are in.
    UserJoinedSpace {
        /// The space.
        space_id: SpaceId,
        /// The new member.
        user_id: UserId,
    },
    /// Presence snapshot for a space.
    SpacePresence {
        /// The space.
        space_id: SpaceId,
        /// Members currently online.
        online_users: Vec<UserId>,
    },
    /// Another member's session progress.
    SessionProgress {
        /// The session.
        session_id: SessionId,
        /// Its owner.
        user_id: UserId,
        /// Accumulated active duration in seconds.
        elapsed_secs: u64,
    },
    /// Chat message from a space member.
    Message {
        /// The space.
        space_id: SpaceId,
        /// Sender.
        user_id: UserId,
        /// Message body.
        body: String,
    },
}

impl ServerEvent {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// The kind discriminant, used as the subscription key in the event bus.
    pub fn kind(&self) -> ServerEventKind {
        match self {
            Self::Authenticated => ServerEventKind::Authenticated,
            Self::AuthError { .. } => ServerEventKind::AuthError,
            Self::SpaceJoined { .. } => ServerEventKind::SpaceJoined,
            Self::UserJoinedSpace { .. } => ServerEventKind::UserJoinedSpace,
            Self::SpacePresence { .. } => ServerEventKind::SpacePresence,
            Self::SessionProgress { .. } => ServerEventKind::SessionProgress,
            Self::Message { .. } => ServerEventKind::Message,
        }
    }
}

/// Discriminant of a [`ServerEvent`], used to key handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    /// [`ServerEvent::Authenticated`]
    Authenticated,
    /// [`ServerEvent::AuthError`]
    AuthError,
    /// [`ServerEvent::SpaceJoined`]
    SpaceJoined,
    /// [`ServerEvent::UserJoinedSpace`]
    UserJoinedSpace,
    /// [`ServerEvent::SpacePresence`]
    SpacePresence,
    /// [`ServerEvent::SessionProgress`]
    SessionProgress,
    /// [`ServerEvent::Message`]
    Message,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_space_wire_shape() {
        let event = ClientEvent::JoinSpace {
            space_id: SpaceId::new("space-1"),
            user_id: UserId::new("user-1"),
        };
        let json: Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "join_space");
        assert_eq!(json["space_id"], "space-1");
        assert_eq!(json["user_id"], "user-1");
    }

    #[test]
    fn client_event_roundtrip() {
        let event = ClientEvent::Heartbeat {
            user_id: UserId::new("user-1"),
            timestamp_ms: 1_705_000_000_000,
        };
        let restored = ClientEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn session_started_allows_no_space() {
        let event = ClientEvent::SessionStarted {
            session_id: SessionId::new(),
            user_id: UserId::new("user-1"),
            space_id: None,
        };
        let restored = ClientEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn server_event_roundtrip() {
        let event = ServerEvent::SpacePresence {
            space_id: SpaceId::new("space-1"),
            online_users: vec![UserId::new("a"), UserId::new("b")],
        };
        let restored = ServerEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn server_event_parses_tagged_json() {
        let raw = json!({"type": "space_joined", "space_id": "space-9"});
        let event = ServerEvent::from_bytes(raw.to_string().as_bytes()).unwrap();
        assert_eq!(
            event,
            ServerEvent::SpaceJoined {
                space_id: SpaceId::new("space-9")
            }
        );
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            ServerEvent::Authenticated.kind(),
            ServerEventKind::Authenticated
        );
        assert_eq!(
            ServerEvent::AuthError {
                message: "expired".into()
            }
            .kind(),
            ServerEventKind::AuthError
        );
    }

    #[test]
    fn malformed_bytes_fail_cleanly() {
        assert!(ServerEvent::from_bytes(b"not json").is_err());
        assert!(ClientEvent::from_bytes(b"{\"type\":\"unknown\"}").is_err());
    }
}
