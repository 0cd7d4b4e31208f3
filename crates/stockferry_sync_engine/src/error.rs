//! Error types for the transfer engine.

use stockferry_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote side answered with something undecodable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote side rejected the chunk.
    #[error("server error: {0}")]
    ServerError(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// State store error.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// A transfer was submitted with no items.
    #[error("transfer has no items")]
    EmptyInput,

    /// Category name outside the closed set.
    #[error("invalid category: {0}")]
    InvalidCategory(String),

    /// Too many unfinished transfers.
    #[error("too many active transfers (limit {limit})")]
    TooManyActive {
        /// The configured limit.
        limit: usize,
    },

    /// Unknown transfer id.
    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    /// The transfer is not in a state that allows the operation.
    #[error("transfer {transfer_id} is {status}, expected {expected}")]
    InvalidState {
        /// The transfer.
        transfer_id: String,
        /// Its current status.
        status: String,
        /// The status the operation needs.
        expected: String,
    },

    /// A worker thread could not be started.
    #[error("failed to start worker: {0}")]
    Worker(String),
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
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Maps core input errors onto their engine counterparts.
    pub(crate) fn from_input(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCategory { name } => Self::InvalidCategory(name),
            CoreError::EmptyInput => Self::EmptyInput,
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("overloaded".into()).is_retryable());
        assert!(!SyncError::Protocol("garbage".into()).is_retryable());
        assert!(!SyncError::EmptyInput.is_retryable());
    }

    #[test]
    fn input_errors_are_mapped() {
        let err = SyncError::from_input(CoreError::invalid_category("widget"));
        assert!(matches!(err, SyncError::InvalidCategory(ref n) if n == "widget"));
        assert!(matches!(
            SyncError::from_input(CoreError::EmptyInput),
            SyncError::EmptyInput
        ));
    }

    #[test]
    fn error_display() {
        let err = SyncError::TooManyActive { limit: 2 };
        assert_eq!(err.to_string(), "too many active transfers (limit 2)");
    }
}
