//! # session-core
//!
//! Pure logic for StudySync (no I/O, instant tests).
//!
//! This crate implements the state machines and queue algorithms of the
//! session core without any network, disk, or clock dependency, enabling
//! fast deterministic unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including
//! timestamps) and produce output without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk, timers) is performed by `session-client`,
//! which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod queue;
pub mod session;

pub use connection::{Action, ConnState, LinkEvent, LinkInput, MAX_RECONNECT_ATTEMPTS};
pub use queue::{EnqueueOutcome, OutboundQueue, RetryVerdict};
pub use session::{EndedSession, LifecycleError, SessionLifecycle, SessionSnapshot};
