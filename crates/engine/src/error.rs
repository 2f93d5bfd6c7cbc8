//! Error types for archive operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for create, extract and repair operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An input reference could not be opened for reading.
    #[error("Source unavailable: {name}: {source}")]
    SourceUnavailable {
        /// Display name of the input reference
        name: String,
        /// Underlying open failure
        #[source]
        source: io::Error,
    },

    /// The name does not map to a known codec, or the codec cannot perform
    /// the requested direction (e.g. creating a RAR).
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The declared split-volume size is below the minimum.
    #[error("Invalid split size: {size} bytes (minimum is {minimum} bytes)")]
    InvalidSplitSize {
        /// Requested volume size in bytes
        size: u64,
        /// Smallest accepted volume size in bytes
        minimum: u64,
    },

    /// Wrong or missing password on an encrypted archive.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The archive failed structural validation.
    #[error("Corrupted archive: {0}")]
    Corrupted(String),

    /// An entry path would escape the destination directory.
    #[error("Security violation: {0}")]
    Security(#[from] SecurityError),

    /// An I/O error occurred while reading or writing.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Cancellation was observed at an entry checkpoint.
    #[error("Cancelled by user")]
    Cancelled,
}

/// Closed classification of [`EngineError`], one discriminant per failure
/// kind a caller is expected to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceUnavailable,
    UnsupportedFormat,
    InvalidSplitSize,
    DecryptionFailed,
    IoFailure,
    OperationCancelled,
}

impl EngineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            EngineError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            EngineError::InvalidSplitSize { .. } => ErrorKind::InvalidSplitSize,
            EngineError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            EngineError::Corrupted(_) | EngineError::Security(_) | EngineError::Io(_) => {
                ErrorKind::IoFailure
            }
            EngineError::Cancelled => ErrorKind::OperationCancelled,
        }
    }

    pub(crate) fn other(msg: impl Into<String>) -> Self {
        EngineError::Io(io::Error::new(io::ErrorKind::Other, msg.into()))
    }
}

impl From<tempfile::PersistError> for EngineError {
    fn from(e: tempfile::PersistError) -> Self {
        EngineError::Io(e.error)
    }
}

impl From<tempfile::PathPersistError> for EngineError {
    fn from(e: tempfile::PathPersistError) -> Self {
        EngineError::Io(e.error)
    }
}

/// Entry-path violations detected during extraction.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Path traversal attempt detected (e.g., "../../../etc/passwd").
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Absolute path not allowed in archive entries.
    #[error("Absolute path not allowed: {0}")]
    AbsolutePath(String),
}

/// Errors loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(EngineError::Cancelled.kind(), ErrorKind::OperationCancelled);
        assert_eq!(
            EngineError::Corrupted("bad".into()).kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(
            EngineError::Security(SecurityError::AbsolutePath("/etc".into())).kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(
            EngineError::InvalidSplitSize {
                size: 10,
                minimum: 65536
            }
            .kind(),
            ErrorKind::InvalidSplitSize
        );
    }
}
