//! File chunking.

use crate::DEFAULT_CHUNK_SIZE;
use std::io;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Splits a file body into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size (minimum 1 byte)
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Start reading `total` bytes of `file` in chunks
    pub fn reader(&self, file: File, total: u64) -> ChunkReader {
        ChunkReader {
            file,
            remaining: total,
            buf: vec![0u8; self.chunk_size],
        }
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential chunk reader over an open file.
///
/// Never yields more than the size announced when the reader was created,
/// even if the file grows while it is being sent.
pub struct ChunkReader {
    file: File,
    remaining: u64,
    buf: Vec<u8>,
}

impl ChunkReader {
    /// Bytes still to be read
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read the next chunk.
    ///
    /// Returns `Ok(None)` once the announced size has been read.
    ///
    /// # Errors
    ///
    /// Returns an `UnexpectedEof` error if the file shrank below the
    /// announced size, or any underlying read error.
    pub async fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = self.buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.file.read(&mut self.buf[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file ended with {} bytes left to send", self.remaining),
            ));
        }

        self.remaining -= n as u64;
        Ok(Some(&self.buf[..n]))
    }
}
