//! Error types for quill

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by documents, stores and the catalog
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied nothing to store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported selector, metric, or document name
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// On-disk content could not be decoded
    #[error("Storage corruption in {}: {reason}", path.display())]
    StorageCorruption {
        /// File that failed to decode
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Vectors in the document were produced by another model
    #[error("Embedding model mismatch: document uses '{stored}', opened with '{current}'")]
    ModelMismatch {
        /// Model recorded in the registry
        stored: String,
        /// Model supplied on open
        current: String,
    },

    /// Accepted by the API but not implemented
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Embedding model failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Encoding a value failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be resolved
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::StorageCorruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error was caused by bad caller input
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::InvalidArgument(_))
    }

    /// Check if this error means a file on disk is unreadable
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::StorageCorruption { .. })
    }
}

/// Result type alias for quill operations
pub type Result<T> = std::result::Result<T, Error>;
