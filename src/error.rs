//! Error types for the request/response layer
//!
//! Transport failures are carried as boxed sources so the client stays
//! generic over the transport implementation. Queue-full and
//! malformed-payload conditions are intentionally NOT represented here:
//! they are logged and counted, never surfaced as errors.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for request/response client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Publish or connect failed at the transport. Not retried by this
    /// layer; the caller decides whether to retry.
    #[error("transport failure")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No response arrived within the caller-supplied deadline.
    #[error("request timed out after {waited:?}")]
    Timeout { waited: Duration },

    /// A correlation id was already in flight. Indicates an id-generation
    /// defect; fatal to that call only.
    #[error("correlation id already in flight: {0}")]
    DuplicateCorrelationId(Uuid),

    /// Request bodies must be JSON objects so the correlation fields can
    /// be attached.
    #[error("request payload must be a JSON object, got {0}")]
    InvalidPayload(String),

    #[error("payload serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Wrap a transport error, boxing the source.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(source))
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_includes_duration() {
        let err = ClientError::Timeout {
            waited: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_duplicate_id_display() {
        let id = Uuid::new_v4();
        let err = ClientError::DuplicateCorrelationId(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ClientError::transport(io);
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
        assert!(source.unwrap().to_string().contains("pipe closed"));
    }

    #[test]
    fn test_serialization_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ClientError = json_err.into();
        assert!(matches!(err, ClientError::Serialization(_)));
    }
}
