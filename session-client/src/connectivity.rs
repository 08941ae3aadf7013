//! Connectivity signal shared between the queue and the realtime layer.

use tokio::sync::watch;

/// Broadcasts online/offline transitions to interested parties.
///
/// The embedding application feeds this from whatever platform signal it
/// has (browser events, NetworkMonitor, socket liveness). Consumers watch
/// for edges rather than polling.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record a state change. Redundant updates are suppressed so watchers
    /// only wake on real edges.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
