//! # ferry core
//!
//! Core protocol implementation for ferry, a request/response file-sharing
//! protocol over a single TCP connection.
//!
//! This crate provides:
//! - Frame encoding and decoding (commands, listings, fixed-size headers)
//! - The per-connection transfer session state machine
//! - Transfer progress bookkeeping
//! - Client and server engines on top of tokio
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Node                                    │
//! │   (ClientEngine / ServerEngine: sockets, tasks, events)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Session                                  │
//! │   (Idle / AwaitingListResponse / AwaitingFileHeader / Body)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Frames                                  │
//! │   (LIST, GET <name>, JSON listing, 1024-byte file header)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod node;
pub mod session;
pub mod transfer;

pub use error::{Error, FrameError, ProtocolError, SessionError};
pub use frame::{Command, FileEntry, FileHeader, HeaderFrame, ListResponse, RejectCode};
pub use session::{Aborted, DownloadState, SessionEvent, TransferSession, TransferState};
pub use transfer::{ActiveUpload, TransferProgress};

/// Size of a file header frame in bytes
pub const HEADER_SIZE: usize = 1024;

/// Size of the header's big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest JSON payload a header frame can carry
pub const MAX_HEADER_PAYLOAD: usize = HEADER_SIZE - LENGTH_PREFIX_SIZE;

/// Largest command the server accepts in a single read
pub const MAX_COMMAND_SIZE: usize = 4096;

/// Default cap on buffered listing bytes (4 MiB)
pub const MAX_LIST_SIZE: usize = 4 * 1024 * 1024;

/// Conventional server port
pub const DEFAULT_PORT: u16 = 8000;
