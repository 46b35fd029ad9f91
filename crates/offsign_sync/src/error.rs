//! Error types for the synchronizer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while draining the offline queue.
///
/// Conflicts are not errors - they come back as a
/// [`crate::DeliveryOutcome`] and are resolved internally, never surfaced
/// as failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure (connection refused, timeout, DNS).
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether a later attempt may succeed.
        retryable: bool,
    },

    /// The endpoint answered with a non-success, non-conflict status.
    #[error("server error: HTTP {status}: {message}")]
    Server {
        /// HTTP-equivalent status code.
        status: u16,
        /// Response body or reason text.
        message: String,
    },

    /// Local storage or encryption error during bookkeeping.
    #[error("core error: {0}")]
    Core(#[from] offsign_core::CoreError),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the next sweep should try this delivery again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Server { .. } => true,
            SyncError::Core(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::network_retryable("connection reset").is_retryable());
        assert!(!SyncError::network_fatal("bad certificate").is_retryable());
        assert!(SyncError::server(500, "internal error").is_retryable());
        assert!(SyncError::server(503, "unavailable").is_retryable());
    }

    #[test]
    fn display_includes_status() {
        let err = SyncError::server(502, "bad gateway");
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }
}
