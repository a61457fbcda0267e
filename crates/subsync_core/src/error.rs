//! Error types for the subscription model and store.

use crate::snapshot::SubscriptionState;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the subscription model, the builder and the store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] subsync_storage::StorageError),

    /// A different subscription already owns this name.
    #[error("a different subscription named '{name}' already exists")]
    DuplicateName {
        /// The contested name.
        name: String,
    },

    /// A subscription failed construction-time or commit-time validation.
    #[error("invalid subscription: {message}")]
    InvalidSubscription {
        /// What was wrong with it.
        message: String,
    },

    /// The object type is not part of the database schema.
    #[error("object type '{name}' is not part of the schema")]
    UnknownObjectType {
        /// The object type that was asked for.
        name: String,
    },

    /// A state change that the per-version state machine forbids.
    #[error("version {version} cannot move from {from} to {to}")]
    InvalidStateTransition {
        /// The snapshot version.
        version: u64,
        /// Current state.
        from: SubscriptionState,
        /// Attempted state.
        to: SubscriptionState,
    },

    /// A record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Underlying encoder/decoder message.
        message: String,
    },

    /// The subscription log is damaged.
    #[error("subscription log corruption at offset {offset}: {message}")]
    Corruption {
        /// Offset of the damaged record.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// Record checksum mismatch.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the damaged record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a duplicate name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Creates an invalid subscription error.
    pub fn invalid_subscription(message: impl Into<String>) -> Self {
        Self::InvalidSubscription {
            message: message.into(),
        }
    }

    /// Creates an unknown object type error.
    pub fn unknown_object_type(name: impl Into<String>) -> Self {
        Self::UnknownObjectType { name: name.into() }
    }

    /// Creates a codec error.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec {
            message: message.to_string(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the caller's mutation rather than by
    /// storage or decoding.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::InvalidSubscription { .. }
                | Self::UnknownObjectType { .. }
        )
    }
}
