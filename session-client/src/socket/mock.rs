//! Scriptable in-memory socket.

use super::{Socket, SocketError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// In-memory [`Socket`] for driving the realtime stack in tests.
///
/// A test scripts the server side by queueing inbound frames and forcing
/// one-shot failures, and inspects the client side through the captured
/// emissions. State lives behind a shared handle: clone one for the
/// client under test and keep the other to steer the scenario. An empty
/// inbound queue reads as a peer close, which is how drop-and-reconnect
/// scenarios are staged.
#[derive(Debug, Default)]
pub struct MockSocket {
    inner: Arc<Mutex<MockSocketInner>>,
}

#[derive(Debug, Default)]
struct MockSocketInner {
    connected: bool,
    connected_address: Option<String>,
    emitted: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_next_emit: Option<String>,
    fail_next_recv: Option<String>,
    connect_count: u32,
}

impl MockSocket {
    /// New socket, disconnected, nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an inbound frame for a later `recv()`.
    pub fn queue_event(&self, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.receive_queue.push_back(data);
    }

    /// Every frame the client emitted, oldest first.
    pub fn emitted(&self) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.emitted.clone()
    }

    /// The most recently emitted frame.
    pub fn last_emitted(&self) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.emitted.last().cloned()
    }

    /// The address passed to the last successful `connect()`.
    pub fn connected_address(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_address.clone()
    }

    /// How many times `connect()` succeeded.
    pub fn connect_count(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.connect_count
    }

    /// Make the next `connect()` fail with the given message.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }

    /// Make the next `emit()` fail with the given message.
    pub fn fail_next_emit(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_emit = Some(error.to_string());
    }

    /// Make the next `recv()` fail with the given message.
    pub fn fail_next_recv(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_recv = Some(error.to_string());
    }

    /// Kill the connection as if the network vanished. Pending inbound
    /// frames are lost with it.
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.receive_queue.clear();
    }

    /// Wipe all scripted and captured state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockSocketInner::default();
    }
}

impl Clone for MockSocket {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Socket for MockSocket {
    async fn connect(&self, address: &str) -> Result<(), SocketError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(SocketError::Unreachable(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        inner.connect_count += 1;
        Ok(())
    }

    async fn emit(&self, data: &[u8]) -> Result<(), SocketError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(SocketError::NotConnected);
        }
        if let Some(error) = inner.fail_next_emit.take() {
            return Err(SocketError::EmitFailed(error));
        }

        inner.emitted.push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, SocketError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(SocketError::NotConnected);
        }
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(SocketError::RecvFailed(error));
        }

        inner.receive_queue.pop_front().ok_or(SocketError::Closed)
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn close(&self) -> Result<(), SocketError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        Ok(())
    }
}
