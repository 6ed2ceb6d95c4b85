//! Error types for the sync engine library

use std::path::PathBuf;

use drivesync_core::RemoteError;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Missing or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filter pattern errors
    #[error("Filter pattern error: {0}")]
    FilterPattern(String),

    /// Malformed snapshot text
    #[error("Snapshot parse error at line {line}: {message}")]
    SnapshotParse { line: usize, message: String },

    /// Hash computation errors
    #[error("Hash computation error for '{path}': {message}")]
    Hash { path: PathBuf, message: String },

    /// Directory scanning errors
    #[error("Directory scan error at '{path}': {message}")]
    DirectoryScan { path: PathBuf, message: String },

    /// A remote store call failed for one entry
    #[error("Remote operation failed for '{path}': {source}")]
    Remote {
        path: String,
        #[source]
        source: RemoteError,
    },

    /// A directory was expected where a file exists, or the reverse
    #[error("Structural conflict at '{path}': {message}")]
    StructuralConflict { path: String, message: String },

    /// A file node was used as a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: String },

    /// The remote snapshot names a path the remote tree does not have
    #[error("'{path}' is missing on the remote")]
    MissingOnRemote { path: String },

    /// File deletion errors
    #[error("File deletion error at '{path}': {message}")]
    FileDeletion { path: PathBuf, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new snapshot parse error
    pub fn parse_error(line: usize, message: impl Into<String>) -> Self {
        Self::SnapshotParse {
            line,
            message: message.into(),
        }
    }

    /// Create a new hash error
    pub fn hash_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Hash {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryScan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap a remote store failure with the path it was issued for
    pub fn remote_error(path: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            path: path.into(),
            source,
        }
    }

    pub fn conflict_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StructuralConflict {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    pub fn missing_on_remote(path: impl Into<String>) -> Self {
        Self::MissingOnRemote { path: path.into() }
    }

    /// Create a new file deletion error
    pub fn deletion_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileDeletion {
            path: path.into(),
            message: message.into(),
        }
    }
}
