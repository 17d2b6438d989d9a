//! Error types for project persistence.

use crate::types::Hash;
use serde_json::error::Category;
use thiserror::Error;

/// Main error type for project operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The user declined a directory or file permission prompt.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Could not open the file: directory={directory} filename={filename}")]
    NotFound { directory: String, filename: String },

    #[error("No directory is bound")]
    NoDirectoryBound,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid project format: {0}")]
    InvalidFormat(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: Hash, got: Hash },
}

impl ProjectError {
    /// Whether the UI should present this as a user cancel rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ProjectError::PermissionDenied(_))
    }

    /// Whether this is a missing-file error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProjectError::NotFound { .. })
    }
}

impl From<serde_json::Error> for ProjectError {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            Category::Syntax | Category::Data | Category::Eof => {
                ProjectError::Deserialization(e.to_string())
            }
            Category::Io => ProjectError::Serialization(e.to_string()),
        }
    }
}

/// Result type for project operations.
pub type Result<T> = std::result::Result<T, ProjectError>;
