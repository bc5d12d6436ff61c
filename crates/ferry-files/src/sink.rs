//! Destination files for downloads.

use crate::error::FilesError;
use crate::shared_dir::validate_file_name;
use std::path::{Path, PathBuf};
use std::io::ErrorKind;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// A download target inside a destination directory.
///
/// Dropping the value closes the handle; whatever was written stays on disk.
pub struct DestinationFile {
    path: PathBuf,
    file: File,
    written: u64,
    created: bool,
}

impl DestinationFile {
    /// Open `dir/name` for writing, creating `dir` first if needed.
    ///
    /// An existing file with the same name is left untouched until
    /// [`begin`](Self::begin) is called.
    ///
    /// # Errors
    ///
    /// - `FilesError::UnsafeName` if `name` is not a bare file name
    /// - `FilesError::Io` if the directory cannot be created or the file
    ///   cannot be opened for writing
    pub async fn create(dir: impl AsRef<Path>, name: &str) -> Result<Self, FilesError> {
        validate_file_name(name)?;
        let dir = dir.as_ref();

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FilesError::io(dir, e))?;

        let path = dir.join(name);
        let (file, created) = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => (file, true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let file = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .await
                    .map_err(|e| FilesError::io(&path, e))?;
                (file, false)
            }
            Err(e) => return Err(FilesError::io(&path, e)),
        };

        tracing::debug!("Opened destination {:?} (new: {})", path, created);
        Ok(Self {
            path,
            file,
            written: 0,
            created,
        })
    }

    /// Discard any previous contents once the body is known to follow.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the file cannot be truncated.
    pub async fn begin(&mut self) -> Result<(), FilesError> {
        self.file
            .set_len(0)
            .await
            .map_err(|e| FilesError::io(&self.path, e))?;
        self.written = 0;
        Ok(())
    }

    /// Path of the destination file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append body bytes.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` on write failure.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), FilesError> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| FilesError::io(&self.path, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and close the file, returning its path.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if buffered data cannot be flushed.
    pub async fn finish(mut self) -> Result<PathBuf, FilesError> {
        self.file
            .flush()
            .await
            .map_err(|e| FilesError::io(&self.path, e))?;
        Ok(self.path)
    }

    /// Close the file, removing it only if this request created it and
    /// nothing was written.
    ///
    /// Used when a transfer aborts: an empty placeholder is removed, a
    /// partial body or a file that was there beforehand is left alone.
    pub async fn abandon(mut self) -> Option<PathBuf> {
        if let Err(e) = self.file.flush().await {
            tracing::warn!("Flush of partial file {:?} failed: {}", self.path, e);
        }
        drop(self.file);

        if self.created && self.written == 0 {
            if let Err(e) = tokio::fs::remove_file(&self.path).await {
                tracing::warn!("Could not remove empty file {:?}: {}", self.path, e);
            }
            None
        } else {
            Some(self.path)
        }
    }
}
