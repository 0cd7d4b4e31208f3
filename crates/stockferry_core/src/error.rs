//! Error types for stockferry core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] stockferry_storage::StorageError),

    /// Canonical encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] stockferry_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The state log is corrupted.
    #[error("log corruption at offset {offset}: {message}")]
    Corruption {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A row could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Category name outside the closed set.
    #[error("invalid category: {name}")]
    InvalidCategory {
        /// The rejected name.
        name: String,
    },

    /// Operation name outside the closed set.
    #[error("invalid operation: {name}")]
    InvalidOperation {
        /// The rejected name.
        name: String,
    },

    /// A transfer was submitted with no items.
    #[error("transfer has no items")]
    EmptyInput,

    /// A transfer id is not known to the store.
    #[error("transfer not found: {transfer_id}")]
    TransferNotFound {
        /// The missing id.
        transfer_id: String,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an invalid category error.
    pub fn invalid_category(name: impl Into<String>) -> Self {
        Self::InvalidCategory { name: name.into() }
    }

    /// Creates a transfer-not-found error.
    pub fn transfer_not_found(transfer_id: impl Into<String>) -> Self {
        Self::TransferNotFound {
            transfer_id: transfer_id.into(),
        }
    }

    /// Returns true for errors caused by the caller's input rather than the
    /// environment.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCategory { .. } | Self::InvalidOperation { .. } | Self::EmptyInput
        )
    }
}
