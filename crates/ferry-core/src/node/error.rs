//! Error types for the client and server engines
//!
//! Engine errors are delivered both as `Err` results and inside events, so
//! they are `Clone` and carry their context as owned strings.
//!
//! # Error Categories
//!
//! - **Transient**: may succeed if the caller simply tries again (refused
//!   connection, timeout, dropped transfer, busy peer)
//! - **Permanent**: will not succeed without intervention (bad config,
//!   unsafe name, missing shared directory)

use crate::error::{Error, FrameError, ProtocolError, SessionError};
use ferry_files::FilesError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors produced by [`ClientEngine`](super::ClientEngine) and
/// [`ServerEngine`](super::ServerEngine)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    // ============ Connection Errors ============
    /// Peer actively refused the connection
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// Host could not be resolved or reached
    #[error("Host {addr} unreachable: {reason}")]
    HostUnreachable {
        /// Target as given by the caller
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// `connect` called while a connection is established
    #[error("Already connected; disconnect first")]
    AlreadyConnected,

    /// `connect` called while another attempt is in flight
    #[error("Connection attempt already in progress")]
    ConnectInProgress,

    /// Operation needs an established connection
    #[error("Not connected")]
    NotConnected,

    /// Socket read or write failed
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    /// Listening socket could not be bound
    #[error("Failed to bind {addr}: {reason}")]
    Bind {
        /// Requested listen address
        addr: String,
        /// Underlying failure
        reason: String,
    },

    // ============ Transfer Errors ============
    /// Another exchange is outstanding on this connection
    #[error("Transfer in progress: {0}")]
    TransferInProgress(Cow<'static, str>),

    /// Connection dropped while a file body was being transferred
    #[error("Transfer of {name:?} interrupted after {bytes_received} of {expected_size} bytes")]
    TransferInterrupted {
        /// File name
        name: String,
        /// Body bytes transferred before the drop
        bytes_received: u64,
        /// Announced body size
        expected_size: u64,
    },

    /// Peer sent bytes that do not form a valid frame
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Peer refused or violated the current exchange
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transfer session rejected the operation
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // ============ I/O Errors ============
    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(String),

    /// Server's shared directory is missing or unreadable
    #[error("Shared directory error: {0}")]
    SharedDirectory(String),

    // ============ Configuration & State Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Engine is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::ConnectionRefused(_)
                | NodeError::HostUnreachable { .. }
                | NodeError::Timeout(_)
                | NodeError::ConnectInProgress
                | NodeError::Transport(_)
                | NodeError::TransferInterrupted { .. }
                | NodeError::Protocol(ProtocolError::Busy(_))
        )
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfig(_)
                | NodeError::SharedDirectory(_)
                | NodeError::Protocol(ProtocolError::UnsafeName(_))
        )
    }

    /// Create a transport error with static context (zero allocation)
    #[must_use]
    pub const fn transport(context: &'static str) -> Self {
        NodeError::Transport(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        NodeError::InvalidState(Cow::Borrowed(context))
    }

    /// File I/O failure during a transfer, with the byte count reached
    pub fn file_io(name: &str, bytes: u64, err: impl std::fmt::Display) -> Self {
        NodeError::Io(format!("{name:?} after {bytes} bytes: {err}"))
    }
}

impl From<Error> for NodeError {
    fn from(err: Error) -> Self {
        match err {
            Error::Frame(e) => NodeError::Frame(e),
            Error::Protocol(e) => NodeError::Protocol(e),
            Error::Session(e) => NodeError::Session(e),
        }
    }
}

impl From<FilesError> for NodeError {
    fn from(err: FilesError) -> Self {
        match err {
            FilesError::UnsafeName(name) => NodeError::Protocol(ProtocolError::UnsafeName(name)),
            FilesError::NotADirectory(_) => NodeError::SharedDirectory(err.to_string()),
            other => NodeError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_transient_errors() {
        assert!(NodeError::ConnectionRefused("127.0.0.1:1".into()).is_transient());
        assert!(NodeError::Timeout("connect".into()).is_transient());
        assert!(NodeError::transport("reset").is_transient());
        assert!(NodeError::Protocol(ProtocolError::Busy("a".into())).is_transient());
        assert!(
            NodeError::TransferInterrupted {
                name: "b.bin".into(),
                bytes_received: 1,
                expected_size: 2
            }
            .is_transient()
        );
        assert!(!NodeError::NotConnected.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(NodeError::InvalidConfig(Cow::Borrowed("x")).is_permanent());
        assert!(NodeError::Protocol(ProtocolError::UnsafeName("../x".into())).is_permanent());
        assert!(!NodeError::Timeout("connect".into()).is_permanent());
    }

    #[test]
    fn test_from_core_error() {
        let err: NodeError = Error::Protocol(ProtocolError::NotFound("m".into())).into();
        assert_eq!(err, NodeError::Protocol(ProtocolError::NotFound("m".into())));
    }

    #[test]
    fn test_from_files_error() {
        let err: NodeError = FilesError::UnsafeName("../x".into()).into();
        assert_eq!(err, NodeError::Protocol(ProtocolError::UnsafeName("../x".into())));

        let err: NodeError = FilesError::NotADirectory(PathBuf::from("/nope")).into();
        assert!(matches!(err, NodeError::SharedDirectory(_)));

        let err: NodeError = FilesError::NotFound(PathBuf::from("/x")).into();
        assert!(matches!(err, NodeError::Io(_)));
    }

    #[test]
    fn test_interrupted_message() {
        let err = NodeError::TransferInterrupted {
            name: "b.bin".into(),
            bytes_received: 1_000_000,
            expected_size: 2_097_152,
        };
        assert_eq!(
            err.to_string(),
            "Transfer of \"b.bin\" interrupted after 1000000 of 2097152 bytes"
        );
    }

    #[test]
    fn test_file_io_context() {
        let err = NodeError::file_io("a.txt", 7, "disk full");
        assert_eq!(err.to_string(), "File I/O error: \"a.txt\" after 7 bytes: disk full");
    }
}
