//! Error types for library store and scanner operations.

use thiserror::Error;

/// Errors from volume/issue/file stores and the scanner.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// No volume exists with the given ID.
    #[error("volume {0} not found")]
    VolumeNotFound(i64),

    /// No issue exists with the given ID or calculated number.
    #[error("issue {0} not found")]
    IssueNotFound(String),

    /// No root folder exists with the given ID.
    #[error("root folder {0} not found")]
    RootFolderNotFound(i64),

    /// The root folder still has volumes using it.
    #[error("root folder {0} is in use by {1} volume(s)")]
    RootFolderInUse(i64, i64),

    /// The proposed volume folder conflicts with another managed folder.
    #[error("folder {0} is not allowed: {1}")]
    InvalidFolder(String, String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem operation failed.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
