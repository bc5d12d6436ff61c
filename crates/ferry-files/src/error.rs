//! Error types for shared-directory and destination file access.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Filesystem errors
#[derive(Debug, Error)]
pub enum FilesError {
    /// Requested name is not a bare file name
    #[error("unsafe file name: {0:?}")]
    UnsafeName(String),

    /// File does not exist (or vanished since it was listed)
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Path exists but is not a regular file
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Shared directory is missing or is not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Underlying I/O failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Source error
        #[source]
        source: io::Error,
    },
}

impl FilesError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
