use thiserror::Error;

/// Application-wide error types for Culler.
#[derive(Error, Debug)]
pub enum AppError {
    /// Entity was not found in the rendered list during this pass.
    #[error("Entity not found in rendered list: {0}")]
    LookupMiss(String),

    /// Waiting for an element exceeded its bound.
    #[error("Timed out after {millis}ms waiting for {selector}")]
    HostTimeout { selector: String, millis: u64 },

    /// The host signalled throttling.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Observer or host channel is gone.
    #[error("Host disconnected: {0}")]
    HostDisconnected(String),

    /// Host operation failed (script evaluation, navigation, click).
    #[error("Host error: {0}")]
    HostError(String),

    /// Persistent store read or write failed.
    #[error("Store error: {0}")]
    StoreError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A persisted record broke one of its invariants.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A run is already active, or the request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operator stopped the run.
    #[error("Cancelled by operator")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient at per-entity granularity and
    /// the entity should be requeued rather than the run halted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LookupMiss(_) | AppError::HostTimeout { .. } | AppError::HostDisconnected(_)
        )
    }

    /// Returns true if this error is the cooperative stop signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Host error strings that only mean the observing surface went away.
    pub fn is_disconnect_message(msg: &str) -> bool {
        const MARKERS: &[&str] = &[
            "context invalidated",
            "connection closed",
            "channel closed",
            "port closed",
            "Could not establish connection",
            "Receiving end does not exist",
        ];
        MARKERS.iter().any(|m| msg.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::LookupMiss("alice".into()).is_retryable());
        assert!(
            AppError::HostTimeout {
                selector: "[data-testid=\"confirm\"]".into(),
                millis: 5000,
            }
            .is_retryable()
        );
        assert!(AppError::HostDisconnected("gone".into()).is_retryable());
        assert!(!AppError::RateLimitExceeded.is_retryable());
        assert!(!AppError::StoreError("disk full".into()).is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }

    #[test]
    fn test_cancellation() {
        assert!(AppError::Cancelled.is_cancellation());
        assert!(!AppError::Generic("x".into()).is_cancellation());
    }

    #[test]
    fn test_disconnect_messages() {
        assert!(AppError::is_disconnect_message(
            "Extension context invalidated."
        ));
        assert!(AppError::is_disconnect_message(
            "Could not establish connection. Receiving end does not exist."
        ));
        assert!(!AppError::is_disconnect_message("button not found"));
    }
}
