//! Server-side state of one file being streamed to a client.

use super::progress::percent;
use ferry_files::ChunkReader;

/// File body currently being sent on a connection
pub struct ActiveUpload {
    /// Name the client asked for
    pub file_name: String,
    /// Size announced in the header
    pub total_size: u64,
    /// Body bytes written to the socket so far
    pub bytes_sent: u64,
    /// Open source file
    pub source: ChunkReader,
}

impl ActiveUpload {
    /// Start an upload of `total_size` bytes read from `source`
    pub fn new(file_name: impl Into<String>, total_size: u64, source: ChunkReader) -> Self {
        Self {
            file_name: file_name.into(),
            total_size,
            bytes_sent: 0,
            source,
        }
    }

    /// Account for `n` more bytes written and return the new percentage
    pub fn record_sent(&mut self, n: usize) -> u8 {
        self.bytes_sent = self.bytes_sent.saturating_add(n as u64).min(self.total_size);
        self.percent()
    }

    /// Whole percentage sent
    #[must_use]
    pub fn percent(&self) -> u8 {
        percent(self.bytes_sent, self.total_size)
    }

    /// Check if the whole body has been sent
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total_size
    }
}

impl std::fmt::Debug for ActiveUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveUpload")
            .field("file_name", &self.file_name)
            .field("total_size", &self.total_size)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}
