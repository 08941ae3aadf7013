//! Session summary shapes.
//!
//! [`SummaryResponse`] is the raw JSON the backend's unified
//! session-processing endpoint returns. [`SessionSummary`] is the
//! normalized, immutable shape the UI consumes. The scoring algorithms
//! behind these fields (XP, audit risk, ranking tiers) are an opaque,
//! versioned backend contract; only the shape is binding here, so every
//! gamification section deserializes with defaults when absent.

use serde::{Deserialize, Serialize};

/// XP result of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XpSummary {
    /// XP earned by this session.
    #[serde(default)]
    pub delta: i64,
    /// Total XP after this session.
    #[serde(default)]
    pub total: i64,
    /// Level after this session.
    #[serde(default)]
    pub level: u32,
}

/// Streak result of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreakSummary {
    /// Whether the streak survived ("kept", "extended", "broken"...).
    #[serde(default)]
    pub status: String,
    /// Change in streak length.
    #[serde(default)]
    pub delta: i32,
    /// Current streak length in days.
    #[serde(default)]
    pub current: u32,
    /// Best streak ever.
    #[serde(default)]
    pub best: u32,
    /// Milestone reached by this session, if any (e.g. 7, 30, 100 days).
    #[serde(default)]
    pub milestone: Option<u32>,
}

/// Anti-cheat audit result of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    /// Computed risk score, 0.0..=1.0.
    #[serde(default)]
    pub risk: f64,
    /// Whether the session counts as valid study time.
    #[serde(default = "default_valid")]
    pub valid: bool,
    /// Suspicious patterns detected, if any.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Leniency applied to the risk score.
    #[serde(default)]
    pub forgiveness: f64,
}

fn default_valid() -> bool {
    true
}

/// Ranking result of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingSummary {
    /// Current tier name.
    #[serde(default)]
    pub tier: String,
    /// Ranking score after this session.
    #[serde(default)]
    pub score: i64,
    /// Progress toward the next tier, 0.0..=1.0.
    #[serde(default)]
    pub progress: f64,
    /// Whether this session caused a tier promotion.
    #[serde(default)]
    pub promoted: bool,
}

/// Raw response of the backend finalize-session endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    /// XP section.
    #[serde(default)]
    pub xp: XpSummary,
    /// Streak section.
    #[serde(default)]
    pub streak: StreakSummary,
    /// Audit section.
    #[serde(default)]
    pub audit: AuditSummary,
    /// Ranking section.
    #[serde(default)]
    pub ranking: RankingSummary,
}

/// Notification booleans derived from a [`SummaryResponse`].
///
/// The UI may re-derive these but must not mutate the summary itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTriggers {
    /// XP was gained.
    pub xp_gained: bool,
    /// The streak survived the day.
    pub streak_kept: bool,
    /// A streak milestone was reached.
    pub streak_milestone: bool,
    /// A ranking promotion happened.
    pub promotion: bool,
    /// Fire the celebratory effect.
    pub confetti: bool,
}

impl NotificationTriggers {
    /// Derive notification triggers from a raw backend response.
    ///
    /// Confetti fires iff a streak milestone or a promotion is present.
    pub fn derive(response: &SummaryResponse) -> Self {
        let streak_milestone = response.streak.milestone.is_some();
        let promotion = response.ranking.promoted;
        Self {
            xp_gained: response.xp.delta > 0,
            streak_kept: response.streak.delta >= 0 && response.streak.current > 0,
            streak_milestone,
            promotion,
            confetti: streak_milestone || promotion,
        }
    }
}

/// The normalized result of backend session processing.
///
/// Immutable once built; discarded after display, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// XP section.
    pub xp: XpSummary,
    /// Streak section.
    pub streak: StreakSummary,
    /// Audit section.
    pub audit: AuditSummary,
    /// Ranking section.
    pub ranking: RankingSummary,
    /// Derived notification triggers.
    pub notifications: NotificationTriggers,
}

impl From<SummaryResponse> for SessionSummary {
    fn from(response: SummaryResponse) -> Self {
        let notifications = NotificationTriggers::derive(&response);
        Self {
            xp: response.xp,
            streak: response.streak,
            audit: response.audit,
            ranking: response.ranking,
            notifications,
        }
    }
}

/// Counts returned by the offline-sync endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Events accepted by the backend.
    #[serde(default)]
    pub synced: u32,
    /// Events the backend is still processing.
    #[serde(default)]
    pub pending: u32,
    /// Events that collided with server state and were reconciled.
    #[serde(default)]
    pub conflict_resolved: u32,
}
