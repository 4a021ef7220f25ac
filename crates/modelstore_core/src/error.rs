//! Error types for modelstore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in modelstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] modelstore_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] modelstore_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record with the same primary key value already exists.
    #[error("primary key conflict in collection {collection}: key {key} already exists")]
    PrimaryKeyConflict {
        /// Collection that holds the existing record.
        collection: String,
        /// Rendered primary key value.
        key: String,
    },

    /// Operation not permitted for this entity type or in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The store could not be opened or is in an unusable state.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// A query referenced something the entity type does not have.
    #[error("query error: {message}")]
    QueryError {
        /// Description of the malformed query.
        message: String,
    },

    /// A handle or transaction was requested while one is already held.
    #[error("reentrant acquisition: {message}")]
    ReentrantAcquisition {
        /// Description of the conflicting acquisition.
        message: String,
    },

    /// Background work panicked before producing an outcome.
    #[error("background task panicked: {message}")]
    TaskPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The background executor shut down before the work could run.
    #[error("background executor shut down before the call ran")]
    ExecutorShutdown,

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a primary key conflict error.
    pub fn primary_key_conflict(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::PrimaryKeyConflict {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a store unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query_error(message: impl Into<String>) -> Self {
        Self::QueryError {
            message: message.into(),
        }
    }

    /// Creates a reentrant acquisition error.
    pub fn reentrant_acquisition(message: impl Into<String>) -> Self {
        Self::ReentrantAcquisition {
            message: message.into(),
        }
    }

    /// Creates a task panicked error.
    pub fn task_panicked(message: impl Into<String>) -> Self {
        Self::TaskPanicked {
            message: message.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation failed error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }
}
