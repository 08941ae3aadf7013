//! # session-types
//!
//! Wire format types for the StudySync session-lifecycle core.
//!
//! This crate provides the foundational types used across all StudySync crates:
//! - [`SessionId`], [`UserId`], [`SpaceId`], [`RequestId`] - Identity types
//! - [`SessionEvent`] - Immutable facts about a study session
//! - [`QueuedRequest`] - Durability wrapper around one outbound API call
//! - [`ClientEvent`], [`ServerEvent`] - Realtime channel events
//! - [`SessionSummary`] - Normalized result of backend session processing
//! - [`WireError`] - Serialization error type

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;
mod queue;
mod realtime;
mod summary;

pub use error::WireError;
pub use events::{SessionEvent, SessionEventKind, SessionPhase};
pub use ids::{RequestId, SessionId, SpaceId, UserId};
pub use queue::{HttpMethod, QueuedRequest};
pub use realtime::{ClientEvent, ServerEvent, ServerEventKind};
pub use summary::{
    AuditSummary, NotificationTriggers, RankingSummary, SessionSummary, StreakSummary,
    SummaryResponse, SyncCounts, XpSummary,
};
