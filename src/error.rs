//! Error types for vbak

use crate::version::VersionId;
use thiserror::Error;

/// Main error type for backup, archive, retention and restore operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source directory not found or unreadable: {path}")]
    SourceNotFound { path: String },

    #[error("Cannot decode archive {path}: {reason}")]
    ArchiveDecode { path: String, reason: String },

    #[error("No version has been built since the last save")]
    NothingStaged,

    #[error("No committed version with id {id}")]
    InvalidVersion { id: VersionId },

    #[error("Cannot write restore destination {path}: {reason}")]
    Destination { path: String, reason: String },

    #[error("Skipped unreadable file {path}: {reason}")]
    PerFileRead { path: String, reason: String },

    #[error("Invalid retention settings: {reason}")]
    InvalidRetention { reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },
}

impl Error {
    pub(crate) fn decode(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Error::ArchiveDecode {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn destination(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Error::Destination {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias for vbak operations
pub type Result<T> = std::result::Result<T, Error>;
