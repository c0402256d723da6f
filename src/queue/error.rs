//! Error types for queue operations.

use thiserror::Error;

use crate::aggregator::AggregatorError;
use crate::download::DownloadError;
use crate::library::LibraryError;
use crate::naming::{RenameError, TemplateError};
use crate::postprocess::ProcessError;

/// Errors from queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// No download exists with the given ID.
    #[error("download {0} not found")]
    DownloadNotFound(i64),

    /// The aggregator page could not produce downloads.
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),

    /// A download client failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Library store access failed.
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// Post-processing failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Naming failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Renaming failed.
    #[error(transparent)]
    Rename(#[from] RenameError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
