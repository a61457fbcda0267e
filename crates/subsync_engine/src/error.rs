//! Error types for the subscription coordinator.

use std::time::Duration;
use subsync_core::CoreError;
use subsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for coordinator and channel operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while mutating or synchronizing subscriptions.
///
/// A server rejecting a subscription set is not an error value; it shows up
/// as the `ERROR` state on the set.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Validation or persistence error from the local side.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// A wait ran out of time. The set keeps converging.
    #[error("timed out after {0:?} waiting for synchronization")]
    Timeout(Duration),

    /// A blocking wait was called on an async runtime thread.
    #[error("blocking wait called from an async context; use the async variant")]
    BlockingInAsyncContext,

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// The coordinator was closed.
    #[error("subscription coordinator is closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true for local validation failures (bad subscription,
    /// duplicate name, unknown object type).
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Core(e) if e.is_validation())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SyncError::Closed.is_retryable());
    }

    #[test]
    fn core_errors_pass_through() {
        let err = SyncError::from(CoreError::duplicate_name("people"));
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "a different subscription named 'people' already exists"
        );
        assert!(!SyncError::NotConnected.is_validation());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        let err = SyncError::from(ProtocolError::Decode("truncated".into()));
        assert_eq!(err.to_string(), "protocol error: decode error: truncated");
    }
}
