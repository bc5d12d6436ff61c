//! Events delivered to the layer driving an engine.
//!
//! Each engine owns one unbounded channel; events are sent in the order the
//! underlying transitions happened.

use super::error::NodeError;
use crate::frame::FileEntry;
use std::net::SocketAddr;

/// Server-assigned connection identifier
pub type ConnectionId = u64;

/// Client engine events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connection established (`true`) or closed (`false`)
    ConnectionStateChanged(bool),

    /// Listing received, in server scan order
    ListReceived(Vec<FileEntry>),

    /// Download progress
    Progress {
        /// File name
        name: String,
        /// Whole percentage
        percent: u8,
        /// Body bytes written so far
        bytes_received: u64,
        /// Announced body size
        expected_size: u64,
    },

    /// Download finished and the destination file is closed
    FileReceived {
        /// File name
        name: String,
        /// Bytes written
        size: u64,
    },

    /// Download cancelled by the caller; partial file kept if non-empty
    Cancelled {
        /// File name
        name: String,
        /// Body bytes written before the cancel
        bytes_received: u64,
    },

    /// An exchange or the connection failed
    Error(NodeError),
}

/// Server engine events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Listening
    Started {
        /// Bound address
        addr: SocketAddr,
    },

    /// Listener closed and every connection shut down
    Stopped,

    /// Client accepted
    ClientConnected {
        /// Connection identifier
        id: ConnectionId,
        /// Client address
        peer: SocketAddr,
    },

    /// Client connection closed
    ClientDisconnected {
        /// Connection identifier
        id: ConnectionId,
        /// Client address
        peer: SocketAddr,
    },

    /// Listing written to a client
    ListServed {
        /// Connection identifier
        id: ConnectionId,
        /// Number of entries
        count: usize,
    },

    /// Client asked for a file
    FileRequested {
        /// Connection identifier
        id: ConnectionId,
        /// Requested name, as received
        name: String,
    },

    /// Body send progress
    SendProgress {
        /// Connection identifier
        id: ConnectionId,
        /// File name
        name: String,
        /// Whole percentage
        percent: u8,
    },

    /// Whole body written
    FileSent {
        /// Connection identifier
        id: ConnectionId,
        /// File name
        name: String,
        /// Body size
        size: u64,
    },

    /// Failure on one connection (`id`) or on the listener (`None`)
    Error {
        /// Connection identifier, if any
        id: Option<ConnectionId>,
        /// What went wrong
        error: NodeError,
    },
}
