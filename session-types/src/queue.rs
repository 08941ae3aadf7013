//! Durability records for outbound requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RequestId;

/// HTTP method of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl HttpMethod {
    /// The method as an uppercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A durability wrapper around one outbound API call.
///
/// Created when a request cannot or should not be sent immediately, removed
/// on success or permanent failure. Persisted across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique id of this queue entry.
    pub id: RequestId,
    /// Target endpoint path, relative to the API base URL.
    pub endpoint: String,
    /// HTTP method to use.
    pub method: HttpMethod,
    /// JSON request body.
    pub body: Value,
    /// Delivery attempts so far.
    pub retry_count: u32,
    /// Maximum delivery attempts before the entry is dropped and reported.
    pub max_retries: u32,
    /// When the entry was enqueued, milliseconds since the Unix epoch.
    pub enqueued_at_ms: u64,
}

impl QueuedRequest {
    /// Create a fresh entry with zero retries.
    pub fn new(
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: Value,
        max_retries: u32,
        now_ms: u64,
    ) -> Self {
        Self {
            id: RequestId::new(),
            endpoint: endpoint.into(),
            method,
            body,
            retry_count: 0,
            max_retries,
            enqueued_at_ms: now_ms,
        }
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
