//! # session-client
//!
//! Client services for the StudySync session-lifecycle core.
//!
//! This is the library a study-tracking application embeds to track the
//! active session, persist outbound events across restarts and offline
//! periods, mirror presence over the realtime channel, and finalize a
//! session against the backend gamification pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Application → SessionTracker ─┬→ DurableQueue → Delivery → HTTP
//!                               ├→ RealtimeClient → Socket  → WebSocket
//!                               └→ ResultAggregator → SessionApi → HTTP
//!                      ↓
//!               session-core (pure state machines)
//! ```
//!
//! Every seam (`Socket`, `Delivery`, `SessionApi`, `QueueStore`,
//! `TokenProvider`) is a trait with a mock or in-memory implementation so
//! the whole stack is testable without a network.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bus;
pub mod config;
pub mod connectivity;
pub mod queue;
pub mod realtime;
pub mod results;
pub mod socket;
pub mod store;
pub mod tracker;

pub use api::{ApiError, HttpApi, SessionApi, StaticToken, TokenProvider};
pub use bus::{EventBus, SubscriptionId};
pub use config::ClientConfig;
pub use connectivity::ConnectivityMonitor;
pub use queue::{Delivery, DeliveryError, DropReason, DroppedRequest, DurableQueue};
pub use realtime::RealtimeClient;
pub use results::ResultAggregator;
pub use socket::{MockSocket, Socket, SocketError};
pub use store::{JsonFileStore, MemoryStore, QueueStore, StoreError};
pub use tracker::{SessionTracker, TrackerError};
