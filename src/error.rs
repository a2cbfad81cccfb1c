//! Error types for the surface store.

use crate::types::LogicalKey;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A read against the durable store failed.
    #[error("Storage unavailable while reading {key}: {reason}")]
    StorageUnavailable { key: LogicalKey, reason: String },

    /// A write could not be persisted. No local state was touched.
    #[error("Failed to persist {key}: {reason}")]
    StorageWriteFailed { key: LogicalKey, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Surface has been disposed")]
    Disposed,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, SyncError>;
