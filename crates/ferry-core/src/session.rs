//! Per-connection transfer state machine.
//!
//! The session consumes raw bytes from the stream and turns them into
//! [`SessionEvent`]s. It performs no I/O: file body bytes are handed back to
//! the caller, which owns the destination file and the socket.
//!
//! ```text
//!            begin_list_request()            list parses
//!   Idle ───────────────────────────▶ AwaitingListResponse ─────────▶ Idle
//!    │
//!    │ begin_download(name)          header ok, size > 0
//!    └──────────────▶ AwaitingFileHeader ─────────────▶ ReceivingFileBody
//!                           │ size 0 / mismatch / reject      │ all bytes
//!                           ▼                                 ▼
//!                          Idle                              Idle
//! ```

use crate::error::{Error, FrameError, ProtocolError, SessionError};
use crate::frame::{FileEntry, HeaderFrame, ListResponse, RejectCode};
use crate::transfer::percent;
use crate::{HEADER_SIZE, MAX_LIST_SIZE};

/// Exchange currently in progress on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Nothing outstanding
    #[default]
    Idle,
    /// LIST sent, buffering the listing
    AwaitingListResponse,
    /// GET sent, buffering the 1024-byte header
    AwaitingFileHeader,
    /// Header accepted, body bytes flowing
    ReceivingFileBody,
}

/// Bookkeeping for a requested file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    /// Name sent in the GET command
    pub requested_name: String,
    /// Size from the accepted header (0 until then)
    pub expected_size: u64,
    /// Body bytes handed out so far
    pub bytes_received: u64,
}

/// Outcome of feeding bytes to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Listing fully received
    ListReceived(Vec<FileEntry>),
    /// Header accepted, body of `size` bytes follows
    HeaderAccepted {
        /// File name
        name: String,
        /// Body size
        size: u64,
    },
    /// Body bytes to append to the destination
    Body(Vec<u8>),
    /// Body progress after the preceding `Body` event
    Progress {
        /// File name
        name: String,
        /// Bytes received so far
        bytes_received: u64,
        /// Size from the header
        expected_size: u64,
        /// Whole percentage
        percent: u8,
    },
    /// Last body byte received
    Completed {
        /// File name
        name: String,
        /// Bytes received
        size: u64,
    },
    /// Current exchange aborted; the session is back to `Idle`
    Failed(Error),
    /// Bytes arrived with nothing outstanding and were dropped
    Discarded(usize),
}

/// Exchange interrupted by [`TransferSession::abort`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aborted {
    /// Session was idle
    Nothing,
    /// A listing was outstanding
    List,
    /// A download was outstanding
    Download(DownloadState),
}

/// Client-side transfer session for one connection
#[derive(Debug)]
pub struct TransferSession {
    state: TransferState,
    buffer: Vec<u8>,
    download: Option<DownloadState>,
    max_list_size: usize,
    /// Body bytes of a refused transfer still due from the peer
    discard_remaining: u64,
}

impl TransferSession {
    /// Create an idle session with the default listing cap
    pub fn new() -> Self {
        Self::with_max_list_size(MAX_LIST_SIZE)
    }

    /// Create an idle session that gives up on listings larger than `max`
    pub fn with_max_list_size(max: usize) -> Self {
        Self {
            state: TransferState::Idle,
            buffer: Vec::new(),
            download: None,
            max_list_size: max.max(1),
            discard_remaining: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Check if nothing is outstanding
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == TransferState::Idle
    }

    /// Outstanding download, if any
    #[must_use]
    pub fn download(&self) -> Option<&DownloadState> {
        self.download.as_ref()
    }

    /// Bytes buffered for an incomplete header or listing
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: TransferState) -> bool {
        use TransferState::{AwaitingFileHeader, AwaitingListResponse, Idle, ReceivingFileBody};

        match (self.state, to) {
            (Idle, AwaitingListResponse | AwaitingFileHeader) => true,
            (AwaitingFileHeader, ReceivingFileBody) => true,
            // Completion, failure and abort all return to idle
            (_, Idle) => true,
            _ => false,
        }
    }

    /// Transition to a new state
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if the transition is not allowed
    /// from the current state.
    pub fn transition_to(&mut self, new_state: TransferState) -> Result<(), SessionError> {
        if !self.can_transition(new_state) {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "change state",
            });
        }

        let old_state = self.state;
        self.state = new_state;
        if new_state == TransferState::Idle {
            self.buffer.clear();
        }

        tracing::debug!("Transfer session: {:?} -> {:?}", old_state, new_state);
        Ok(())
    }

    /// Enter `AwaitingListResponse` after a LIST command was sent.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless the session is idle.
    pub fn begin_list_request(&mut self) -> Result<(), SessionError> {
        self.require_idle("request list")?;
        self.transition_to(TransferState::AwaitingListResponse)
    }

    /// Enter `AwaitingFileHeader` after `GET name` was sent.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless the session is idle.
    pub fn begin_download(&mut self, name: impl Into<String>) -> Result<(), SessionError> {
        self.require_idle("request file")?;
        self.transition_to(TransferState::AwaitingFileHeader)?;
        self.download = Some(DownloadState {
            requested_name: name.into(),
            expected_size: 0,
            bytes_received: 0,
        });
        Ok(())
    }

    /// Drop whatever exchange is outstanding and return to `Idle`
    pub fn abort(&mut self) -> Aborted {
        let aborted = match (self.state, self.download.take()) {
            (TransferState::Idle, _) => Aborted::Nothing,
            (TransferState::AwaitingListResponse, _) => Aborted::List,
            (_, Some(download)) => Aborted::Download(download),
            (_, None) => Aborted::Nothing,
        };
        self.discard_remaining = 0;
        self.reset();
        aborted
    }

    fn require_idle(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    fn reset(&mut self) {
        self.download = None;
        // Every state may return to Idle
        let _ = self.transition_to(TransferState::Idle);
    }

    fn fail(&mut self, error: impl Into<Error>) -> SessionEvent {
        let error = error.into();
        tracing::debug!("Transfer session aborted in {:?}: {}", self.state, error);
        self.reset();
        SessionEvent::Failed(error)
    }

    /// Consume newly arrived bytes.
    ///
    /// Events are returned in the order the transitions happened. Bytes that
    /// belong to no outstanding exchange are reported as `Discarded`.
    pub fn feed(&mut self, mut data: &[u8]) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        while !data.is_empty() {
            if self.discard_remaining > 0 {
                let skip = usize::try_from(self.discard_remaining)
                    .map_or(data.len(), |r| r.min(data.len()));
                self.discard_remaining -= skip as u64;
                data = &data[skip..];
                tracing::debug!(
                    "Skipped {} bytes of refused body, {} to go",
                    skip,
                    self.discard_remaining
                );
                events.push(SessionEvent::Discarded(skip));
                continue;
            }

            match self.state {
                TransferState::Idle => {
                    tracing::warn!("Discarding {} unexpected bytes", data.len());
                    events.push(SessionEvent::Discarded(data.len()));
                    break;
                }
                TransferState::AwaitingListResponse => {
                    self.buffer.extend_from_slice(data);
                    data = &[];
                    if let Some(event) = self.try_finish_list() {
                        events.push(event);
                    }
                }
                TransferState::AwaitingFileHeader => {
                    let take = (HEADER_SIZE - self.buffer.len()).min(data.len());
                    self.buffer.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if self.buffer.len() == HEADER_SIZE {
                        events.push(self.accept_header());
                    }
                }
                TransferState::ReceivingFileBody => {
                    let taken = self.take_body(data, &mut events);
                    data = &data[taken..];
                }
            }
        }

        events
    }

    fn try_finish_list(&mut self) -> Option<SessionEvent> {
        match ListResponse::decode(&self.buffer) {
            Ok(list) => {
                self.reset();
                Some(SessionEvent::ListReceived(list.files))
            }
            Err(e) if e.is_recoverable() => {
                if self.buffer.len() >= self.max_list_size {
                    let limit = self.max_list_size;
                    Some(self.fail(FrameError::Malformed(format!(
                        "list response exceeds {limit} bytes without completing"
                    ))))
                } else {
                    None
                }
            }
            Err(e) => Some(self.fail(e)),
        }
    }

    fn accept_header(&mut self) -> SessionEvent {
        let decoded = HeaderFrame::decode(&self.buffer);
        self.buffer.clear();

        let requested = match &self.download {
            Some(d) => d.requested_name.clone(),
            None => {
                return self.fail(SessionError::InvalidState {
                    state: self.state,
                    operation: "accept header",
                });
            }
        };

        let header = match decoded {
            Ok(HeaderFrame::File(header)) => header,
            Ok(HeaderFrame::Rejected { code, message, .. }) => {
                let err = match code {
                    RejectCode::UnsafeName => ProtocolError::UnsafeName(requested),
                    RejectCode::Busy => ProtocolError::Busy(requested),
                    RejectCode::Unreadable => ProtocolError::NotFound(requested),
                    RejectCode::Other(_) => ProtocolError::Rejected {
                        name: requested,
                        message,
                    },
                };
                return self.fail(err);
            }
            Err(e) => return self.fail(e),
        };

        if header.name != requested {
            // The peer streams the announced body regardless
            self.discard_remaining = header.size;
            return self.fail(ProtocolError::NameMismatch {
                requested,
                received: header.name,
            });
        }
        if header.size == 0 {
            return self.fail(ProtocolError::NotFound(requested));
        }

        if let Err(e) = self.transition_to(TransferState::ReceivingFileBody) {
            return self.fail(e);
        }
        if let Some(download) = self.download.as_mut() {
            download.expected_size = header.size;
        }
        SessionEvent::HeaderAccepted {
            name: header.name,
            size: header.size,
        }
    }

    /// Hand out body bytes up to the announced size, returning how many
    /// bytes of `data` were consumed.
    fn take_body(&mut self, data: &[u8], events: &mut Vec<SessionEvent>) -> usize {
        let Some(download) = self.download.as_mut() else {
            events.push(self.fail(SessionError::InvalidState {
                state: self.state,
                operation: "receive body",
            }));
            return 0;
        };

        let remaining = download.expected_size - download.bytes_received;
        let take = usize::try_from(remaining).map_or(data.len(), |r| r.min(data.len()));
        download.bytes_received += take as u64;

        events.push(SessionEvent::Body(data[..take].to_vec()));
        events.push(SessionEvent::Progress {
            name: download.requested_name.clone(),
            bytes_received: download.bytes_received,
            expected_size: download.expected_size,
            percent: percent(download.bytes_received, download.expected_size),
        });

        if download.bytes_received == download.expected_size {
            let completed = SessionEvent::Completed {
                name: download.requested_name.clone(),
                size: download.bytes_received,
            };
            self.reset();
            events.push(completed);
        }

        take
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}
