//! Error types for the embedding index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for index and storage operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The device ran out of space mid-write. Both index files were removed.
    #[error("No space left while writing '{path}'; persisted index files were discarded")]
    DiskFull { path: PathBuf },

    #[error("Failed to (de)serialize id file '{path}': {source}")]
    IdFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(
        "Embedding dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid embedding dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    /// Corrupted index error
    #[error("Index appears to be corrupted: {reason}")]
    IndexCorrupted { reason: String },

    #[error("Operation was cancelled")]
    Cancelled,

    /// Background blocking task panicked or was aborted
    #[error("Background I/O task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::DiskFull { .. } => "DISK_FULL",
            Self::IdFile { .. } => "ID_FILE_ERROR",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidDimension { .. } => "INVALID_DIMENSION",
            Self::IndexCorrupted { .. } => "INDEX_CORRUPTED",
            Self::Cancelled => "CANCELLED",
            Self::TaskFailed(_) => "TASK_FAILED",
            Self::ConfigError { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DiskFull { .. } => vec![
                "Free disk space in the index directory",
                "Rebuild the index; the previous files were removed to avoid a torn state",
            ],
            Self::IndexCorrupted { .. } | Self::IdFile { .. } => vec![
                "Delete the index directory and rebuild the embeddings",
                "Check for disk errors or filesystem corruption",
            ],
            Self::DimensionMismatch { .. } => vec![
                "Ensure the configured dimensions match the embedding model output",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::FileWrite { .. } => vec![
                "Check directory permissions for the index path",
            ],
            Self::Cancelled => vec![
                "The on-disk index was left as it was before the operation",
            ],
            _ => vec![],
        }
    }

    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(IndexError::Cancelled.status_code(), "CANCELLED");
        assert_eq!(
            IndexError::DiskFull {
                path: PathBuf::from("x")
            }
            .status_code(),
            "DISK_FULL"
        );
        assert_eq!(
            IndexError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
            .status_code(),
            "DIMENSION_MISMATCH"
        );
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = IndexError::IndexCorrupted {
            reason: "length mismatch".to_string(),
        };
        assert!(!err.recovery_suggestions().is_empty());
        assert!(err.to_string().contains("length mismatch"));
        assert!(IndexError::Cancelled.is_cancelled());
    }
}
