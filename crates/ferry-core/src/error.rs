//! Error types for the ferry core protocol.

use crate::session::TransferState;
use thiserror::Error;

/// Core protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame parsing error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Peer violated the exchange rules
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Frame-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; recoverable by reading more
    #[error("frame truncated: expected {expected} bytes, have {actual}")]
    Truncated {
        /// Bytes needed to decode
        expected: usize,
        /// Bytes currently available
        actual: usize,
    },

    /// Bytes do not form a valid frame
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Encoded header payload does not fit in the fixed header frame
    #[error("header payload of {size} bytes exceeds {max} byte limit")]
    HeaderTooLarge {
        /// Encoded payload size
        size: usize,
        /// Maximum payload size
        max: usize,
    },

    /// Command line is not `LIST` or `GET <name>`
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl FrameError {
    /// True when buffering more bytes may make the frame decodable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Protocol-level errors: the current exchange is aborted, the connection
/// stays usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header names a different file than the one requested
    #[error("requested {requested:?} but header names {received:?}")]
    NameMismatch {
        /// Name sent in the GET command
        requested: String,
        /// Name found in the header
        received: String,
    },

    /// Zero-size header: file missing, unreadable or empty on the server
    #[error("file {0:?} not found or empty on server")]
    NotFound(String),

    /// Requested name is not a bare file name
    #[error("unsafe file name {0:?}")]
    UnsafeName(String),

    /// Peer already has a transfer running on this connection
    #[error("transfer already in progress for {0:?}")]
    Busy(String),

    /// Server rejected the request for another reason
    #[error("server rejected {name:?}: {message}")]
    Rejected {
        /// Requested name
        name: String,
        /// Server-supplied reason
        message: String,
    },
}

/// Session-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not allowed in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State at the time of the call
        state: TransferState,
        /// Attempted operation
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_is_recoverable() {
        let err = FrameError::Truncated {
            expected: 1024,
            actual: 10,
        };
        assert!(err.is_recoverable());
        assert!(!FrameError::Malformed("x".into()).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err: Error = ProtocolError::NotFound("missing.txt".into()).into();
        assert_eq!(
            err.to_string(),
            "protocol error: file \"missing.txt\" not found or empty on server"
        );

        let err = SessionError::InvalidState {
            state: TransferState::ReceivingFileBody,
            operation: "request list",
        };
        assert_eq!(err.to_string(), "cannot request list while ReceivingFileBody");
    }
}
