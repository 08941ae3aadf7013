//! Realtime socket seam.
//!
//! Everything above this layer speaks [`ServerEvent`]/[`ClientEvent`]
//! JSON; the socket itself only moves opaque byte frames. Production
//! plugs in a WebSocket; tests plug in [`MockSocket`] and script both
//! directions of the channel.
//!
//! Authentication, space membership, heartbeats, and reconnection all
//! live in [`RealtimeClient`](crate::RealtimeClient) — a socket
//! implementation stays dumb on purpose, so swapping the underlying
//! mechanism never touches protocol logic.
//!
//! [`ServerEvent`]: session_types::ServerEvent
//! [`ClientEvent`]: session_types::ClientEvent

mod mock;

pub use mock::MockSocket;

use async_trait::async_trait;
use thiserror::Error;

/// Failures at the byte-frame layer.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The endpoint could not be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// Operation attempted before `connect()` succeeded.
    #[error("socket is not open")]
    NotConnected,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// An outbound frame could not be written.
    #[error("emit failed: {0}")]
    EmitFailed(String),

    /// An inbound frame could not be read.
    #[error("recv failed: {0}")]
    RecvFailed(String),
}

/// One bidirectional frame channel to the realtime server.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Open the channel to the given address.
    async fn connect(&self, address: &str) -> Result<(), SocketError>;

    /// Write one outbound frame.
    async fn emit(&self, data: &[u8]) -> Result<(), SocketError>;

    /// Read the next inbound frame, waiting until one arrives or the
    /// channel dies.
    async fn recv(&self) -> Result<Vec<u8>, SocketError>;

    /// Whether the channel is currently open.
    fn is_connected(&self) -> bool;

    /// Close the channel.
    async fn close(&self) -> Result<(), SocketError>;
}
