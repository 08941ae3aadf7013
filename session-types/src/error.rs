//! Error types for StudySync wire formats.

use thiserror::Error;

/// Errors that can occur serializing or deserializing wire payloads.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = serde_json::from_str::<serde_json::Value>("{")
            .map_err(WireError::Deserialization)
            .unwrap_err();
        assert!(err.to_string().starts_with("deserialization failed"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
