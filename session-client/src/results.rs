//! End-of-session result aggregation.
//!
//! Ships the final session data to the backend's unified processing
//! endpoint and normalizes whatever comes back into a [`SessionSummary`].
//! When the backend is unreachable the payload is handed to the durable
//! queue so the session is never lost, and the caller gets a placeholder
//! summary with no notifications.

use crate::api::SessionApi;
use crate::queue::DurableQueue;
use serde_json::json;
use session_core::EndedSession;
use session_types::{HttpMethod, SessionSummary, SummaryResponse};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of finalizing a session.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// The backend processed the session and returned its summary.
    Processed(SessionSummary),
    /// The backend was unreachable; the payload was queued for later
    /// delivery. The summary is a placeholder with no notifications.
    Deferred(SessionSummary),
    /// The backend rejected the payload for good. Nothing was queued.
    Failed(SessionSummary),
}

impl FinalizeOutcome {
    /// The summary to display, whatever the delivery outcome.
    pub fn summary(&self) -> &SessionSummary {
        match self {
            Self::Processed(s) | Self::Deferred(s) | Self::Failed(s) => s,
        }
    }
}

/// Posts ended sessions to the backend and derives the displayable
/// summary.
pub struct ResultAggregator {
    api: Arc<dyn SessionApi>,
    queue: Arc<DurableQueue>,
}

impl ResultAggregator {
    /// Create an aggregator over the given backend surface and fallback
    /// queue.
    pub fn new(api: Arc<dyn SessionApi>, queue: Arc<DurableQueue>) -> Self {
        Self { api, queue }
    }

    /// Finalize an ended session.
    pub async fn finalize(&self, ended: &EndedSession) -> FinalizeOutcome {
        let body = json!({
            "session_id": ended.session_id,
            "user_id": ended.user_id,
            "space_id": ended.space_id,
            "elapsed_secs": ended.elapsed_secs,
            "ended_at_ms": ended.event.client_timestamp_ms,
        });

        match self.api.finalize(ended.session_id, body.clone()).await {
            Ok(response) => {
                let summary = SessionSummary::from(response);
                info!(
                    session = %ended.session_id,
                    xp = summary.xp.delta,
                    confetti = summary.notifications.confetti,
                    "session finalized"
                );
                FinalizeOutcome::Processed(summary)
            }
            Err(e) if e.is_retryable() => {
                warn!(session = %ended.session_id, error = %e, "finalize deferred to queue");
                let endpoint = format!("/api/sessions/{}/finalize", ended.session_id);
                self.queue.submit(endpoint, HttpMethod::Post, body).await;
                FinalizeOutcome::Deferred(SessionSummary::from(SummaryResponse::default()))
            }
            Err(e) => {
                warn!(session = %ended.session_id, error = %e, "finalize rejected");
                FinalizeOutcome::Failed(SessionSummary::from(SummaryResponse::default()))
            }
        }
    }
}

impl std::fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAggregator").finish()
    }
}
