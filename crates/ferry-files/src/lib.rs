//! # ferry files
//!
//! Filesystem side of the ferry file-sharing protocol.
//!
//! This crate provides:
//! - Bare file name validation shared by client and server
//! - Non-recursive scanning of the server's shared directory
//! - Request-time resolution and opening of shared files
//! - Fixed-size chunked reads for streaming file bodies
//! - Destination files for downloads

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod shared_dir;
pub mod sink;

pub use chunker::{ChunkReader, FileChunker};
pub use error::FilesError;
pub use shared_dir::{SharedDirectory, SharedFile, validate_file_name};
pub use sink::DestinationFile;

/// Default chunk size used when streaming a file body (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
