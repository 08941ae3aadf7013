//! HTTP delivery layer.
//!
//! [`HttpApi`] executes queued requests against the backend, classifying
//! failures so the queue knows what to retry. [`SessionApi`] is the typed
//! surface the result aggregator talks to.

use crate::config::ApiConfig;
use crate::queue::{Delivery, DeliveryError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use session_types::{
    HttpMethod, QueuedRequest, SessionEvent, SessionId, SummaryResponse, SyncCounts, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from backend requests, grouped by how the caller should react.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend could not be reached at all.
    #[error("network unreachable: {0}")]
    Connectivity(String),

    /// The backend answered but the request should be retried later.
    #[error("transient server error (status {status})")]
    Transient {
        /// HTTP status that triggered the classification.
        status: u16,
    },

    /// Credentials were rejected and refreshing them did not help.
    #[error("authentication failed")]
    Auth,

    /// The backend rejected the request for good.
    #[error("request rejected (status {status}): {message}")]
    Permanent {
        /// HTTP status returned by the backend.
        status: u16,
        /// Response body, truncated for logging.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Transient { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return classify_status(status, e.to_string());
        }
        Self::Connectivity(e.to_string())
    }
}

fn classify_status(status: StatusCode, message: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Auth,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ApiError::Transient {
            status: status.as_u16(),
        },
        s if s.is_server_error() => ApiError::Transient {
            status: status.as_u16(),
        },
        s => ApiError::Permanent {
            status: s.as_u16(),
            message,
        },
    }
}

/// Supplies and refreshes the bearer token attached to backend requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token.
    async fn access_token(&self) -> Result<String, ApiError>;

    /// Obtain a fresh token after a 401. Returns the new token.
    async fn refresh(&self) -> Result<String, ApiError>;
}

/// Fixed-token provider for tests and server-to-server use.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, ApiError> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<String, ApiError> {
        Err(ApiError::Auth)
    }
}

/// Typed backend surface used when a session ends.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Post end-of-session data and return the backend's summary. Fields
    /// the backend does not send fall back to defaults.
    async fn finalize(
        &self,
        session_id: SessionId,
        body: Value,
    ) -> Result<SummaryResponse, ApiError>;
}

/// Backend client over HTTP.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpApi {
    /// Create a client for the given backend. Every request carries the
    /// configured timeout so a stalled server cannot block the caller.
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "http client build failed, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: config.base_url.clone(),
            tokens,
        }
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    async fn send_once(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: &Value,
        token: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let method = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, self.url_for(endpoint))
            .bearer_auth(token);
        if !body.is_null() {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Execute a request, refreshing the token once on a 401.
    pub async fn execute(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, ApiError> {
        let token = self.tokens.access_token().await?;
        let response = self.send_once(method, endpoint, body, &token).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!(endpoint, "token rejected, refreshing and retrying once");
            let fresh = self.tokens.refresh().await?;
            self.send_once(method, endpoint, body, &fresh).await?
        } else {
            response
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let mut message = text;
            message.truncate(256);
            return Err(classify_status(status, message));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpApi {
    /// Post a batch of session events accumulated offline. Returns the
    /// backend's reconciliation counts.
    pub async fn sync_events(
        &self,
        user_id: &UserId,
        events: &[SessionEvent],
    ) -> Result<SyncCounts, ApiError> {
        let body = sync_events_body(user_id, events);
        let value = self
            .execute(HttpMethod::Post, "api/sessions/events/sync", &body)
            .await?;
        if value.is_null() {
            return Ok(SyncCounts::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn sync_events_body(user_id: &UserId, events: &[SessionEvent]) -> Value {
    json!({ "user_id": user_id, "events": events })
}

#[async_trait]
impl SessionApi for HttpApi {
    async fn finalize(
        &self,
        session_id: SessionId,
        body: Value,
    ) -> Result<SummaryResponse, ApiError> {
        let endpoint = format!("api/sessions/{session_id}/finalize");
        let value = self.execute(HttpMethod::Post, &endpoint, &body).await?;
        if value.is_null() {
            return Ok(SummaryResponse::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl Delivery for HttpApi {
    async fn deliver(&self, request: &QueuedRequest) -> Result<(), DeliveryError> {
        self.execute(request.method, &request.endpoint, &request.body)
            .await?;
        Ok(())
    }
}

impl From<ApiError> for DeliveryError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Connectivity(msg) => DeliveryError::Connectivity(msg),
            ApiError::Transient { status } => {
                DeliveryError::Transient(format!("status {status}"))
            }
            ApiError::Auth => DeliveryError::Permanent("authentication failed".to_string()),
            ApiError::Permanent { status, message } => {
                DeliveryError::Permanent(format!("status {status}: {message}"))
            }
            ApiError::InvalidResponse(e) => DeliveryError::Permanent(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_classify_as_transient() {
        let error = classify_status(StatusCode::INTERNAL_SERVER_ERROR, String::new());
        assert!(matches!(error, ApiError::Transient { status: 500 }));
        assert!(error.is_retryable());

        let error = classify_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(error.is_retryable());
    }

    #[test]
    fn client_errors_classify_as_permanent() {
        let error = classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad body".to_string());
        assert!(matches!(error, ApiError::Permanent { status: 422, .. }));
        assert!(!error.is_retryable());
    }

    #[test]
    fn unauthorized_classifies_as_auth() {
        let error = classify_status(StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(error, ApiError::Auth));
        assert!(!error.is_retryable());
    }

    #[test]
    fn url_joining_handles_slashes() {
        let config = ApiConfig {
            base_url: "https://api.test/".to_string(),
            ..ApiConfig::default()
        };
        let api = HttpApi::new(&config, Arc::new(StaticToken("tok".to_string())));
        assert_eq!(api.url_for("/api/sessions"), "https://api.test/api/sessions");
        assert_eq!(api.url_for("api/sessions"), "https://api.test/api/sessions");
    }

    #[test]
    fn sync_body_carries_user_and_events() {
        use session_types::{SessionEvent, SessionEventKind, SessionId, SessionPhase};

        let user_id = UserId::new("user-1");
        let session_id = SessionId::new();
        let events = vec![SessionEvent::new(
            session_id,
            SessionEventKind::Heartbeat,
            SessionPhase::Active,
            120,
            1_705_000_000_000,
        )];

        let body = sync_events_body(&user_id, &events);
        assert_eq!(body["user_id"], "user-1");
        assert_eq!(body["events"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["events"][0]["kind"], "heartbeat");
        assert_eq!(body["events"][0]["elapsed_secs"], 120);
    }

    #[test]
    fn delivery_error_preserves_retryability() {
        let transient: DeliveryError = ApiError::Transient { status: 503 }.into();
        assert!(matches!(transient, DeliveryError::Transient(_)));

        let auth: DeliveryError = ApiError::Auth.into();
        assert!(matches!(auth, DeliveryError::Permanent(_)));
    }
}
