//! Per-connection responder used by the server.
//!
//! Each accepted socket gets its own task running [`Connection::run`]. The
//! task answers `LIST` and `GET` commands and streams at most one file body
//! at a time. Responses to commands that arrive while a body is in flight
//! are queued and written once the body is complete.

use super::config::ServerConfig;
use super::error::NodeError;
use super::event::{ConnectionId, ServerEvent};
use crate::error::ProtocolError;
use crate::frame::{Command, FileEntry, FileHeader, HeaderFrame, ListResponse, RejectCode};
use crate::transfer::ActiveUpload;
use ferry_files::{FileChunker, FilesError, SharedDirectory};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

pub(crate) struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    shared: Arc<SharedDirectory>,
    chunker: FileChunker,
    max_command_size: usize,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: watch::Receiver<bool>,
    upload: Option<ActiveUpload>,
    deferred: VecDeque<Vec<u8>>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        shared: Arc<SharedDirectory>,
        config: &ServerConfig,
        events: mpsc::UnboundedSender<ServerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Connection {}: could not set TCP_NODELAY: {}", id, e);
        }
        let (reader, writer) = stream.into_split();
        Self {
            id,
            peer,
            reader,
            writer,
            shared,
            chunker: FileChunker::with_chunk_size(config.chunk_size),
            max_command_size: config.max_command_size,
            events,
            shutdown,
            upload: None,
            deferred: VecDeque::new(),
        }
    }

    /// Serve the connection until the peer leaves, an I/O error occurs or
    /// the server shuts down.
    pub(crate) async fn run(mut self) {
        let mut buf = vec![0u8; self.max_command_size];

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    tracing::debug!("Connection {}: server shutting down", self.id);
                    break;
                }

                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::debug!("Connection {}: closed by {}", self.id, self.peer);
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = self.handle_command(&buf[..n]).await {
                            self.report(e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Connection {}: read failed: {}", self.id, e);
                        break;
                    }
                },

                () = async {}, if self.upload.is_some() => {
                    if let Err(e) = self.send_next_chunk().await {
                        tracing::debug!("Connection {}: {}", self.id, e);
                        if matches!(e, NodeError::Io(_)) {
                            // Source file failed; report that instead of an interruption
                            self.upload = None;
                            self.report(e);
                        }
                        break;
                    }
                }
            }
        }

        if let Some(upload) = self.upload.take() {
            tracing::warn!(
                "Connection {}: upload of {:?} aborted at {} of {} bytes",
                self.id,
                upload.file_name,
                upload.bytes_sent,
                upload.total_size
            );
            self.report(NodeError::TransferInterrupted {
                name: upload.file_name,
                bytes_received: upload.bytes_sent,
                expected_size: upload.total_size,
            });
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::trace!("Connection {}: shutdown: {}", self.id, e);
        }
    }

    async fn handle_command(&mut self, data: &[u8]) -> Result<(), NodeError> {
        let command = match Command::parse(data) {
            Ok(command) => command,
            Err(e) => {
                // Garbage from the peer does not end the connection
                tracing::warn!("Connection {}: {}", self.id, e);
                self.report(e.into());
                return Ok(());
            }
        };

        match command {
            Command::List => self.serve_list().await,
            Command::Get(name) => self.serve_get(name).await,
        }
    }

    async fn serve_list(&mut self) -> Result<(), NodeError> {
        // An empty listing would pass for a valid answer, so a failed scan
        // closes the connection instead
        let files = self.shared.scan().await.inspect_err(|e| {
            tracing::warn!("Connection {}: scan failed: {}", self.id, e);
        })?;

        let count = files.len();
        let list = ListResponse::new(files.into_iter().map(FileEntry::from).collect());
        self.respond(list.encode()?).await?;

        tracing::debug!("Connection {}: served list of {} files", self.id, count);
        self.emit(ServerEvent::ListServed { id: self.id, count });
        Ok(())
    }

    async fn serve_get(&mut self, name: String) -> Result<(), NodeError> {
        self.emit(ServerEvent::FileRequested {
            id: self.id,
            name: name.clone(),
        });

        if let Some(upload) = &self.upload {
            tracing::warn!(
                "Connection {}: GET {:?} while sending {:?}",
                self.id,
                name,
                upload.file_name
            );
            let frame = rejection_frame(&name, &RejectCode::Busy, "transfer already in progress")?;
            self.deferred.push_back(frame);
            return Ok(());
        }

        let (file, size) = match self.shared.open_file(&name).await {
            Ok(opened) => opened,
            Err(FilesError::UnsafeName(_)) => {
                tracing::warn!("Connection {}: rejected unsafe name {:?}", self.id, name);
                let frame = rejection_frame(&name, &RejectCode::UnsafeName, "unsafe file name")?;
                self.respond(frame).await?;
                self.report(NodeError::Protocol(ProtocolError::UnsafeName(name)));
                return Ok(());
            }
            Err(e) => {
                tracing::debug!("Connection {}: {}", self.id, e);
                self.respond(not_found_frame(&name)?).await?;
                self.report(NodeError::Protocol(ProtocolError::NotFound(name)));
                return Ok(());
            }
        };

        if size == 0 {
            self.respond(not_found_frame(&name)?).await?;
            self.report(NodeError::Protocol(ProtocolError::NotFound(name)));
            return Ok(());
        }

        let header = match FileHeader::new(name.as_str(), size).encode() {
            Ok(header) => header,
            Err(e) => {
                let frame = rejection_frame(&name, &RejectCode::Unreadable, &e.to_string())?;
                self.respond(frame).await?;
                self.report(e.into());
                return Ok(());
            }
        };
        self.respond(header).await?;

        tracing::info!("Connection {}: sending {:?} ({} bytes)", self.id, name, size);
        self.upload = Some(ActiveUpload::new(name, size, self.chunker.reader(file, size)));
        Ok(())
    }

    /// Write the next body chunk; the write is raced against shutdown so a
    /// stalled peer cannot hold the server open.
    async fn send_next_chunk(&mut self) -> Result<(), NodeError> {
        let Some(upload) = self.upload.as_mut() else {
            return Ok(());
        };

        let chunk = match upload.source.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => &[][..],
            Err(e) => {
                let err = NodeError::file_io(&upload.file_name, upload.bytes_sent, e);
                tracing::warn!("Connection {}: {}", self.id, err);
                // The announced size can no longer be honoured
                return Err(err);
            }
        };

        let n = chunk.len();
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => {
                return Err(NodeError::transport("server shutting down"));
            }
            written = self.writer.write_all(chunk) => {
                written.map_err(|e| NodeError::Transport(Cow::Owned(e.to_string())))?;
            }
        }

        let before = upload.percent();
        let percent = upload.record_sent(n);
        if percent != before {
            emit(
                &self.events,
                ServerEvent::SendProgress {
                    id: self.id,
                    name: upload.file_name.clone(),
                    percent,
                },
            );
        }

        if upload.is_complete() {
            if let Some(done) = self.upload.take() {
                tracing::info!(
                    "Connection {}: sent {:?} ({} bytes)",
                    self.id,
                    done.file_name,
                    done.total_size
                );
                self.emit(ServerEvent::FileSent {
                    id: self.id,
                    name: done.file_name,
                    size: done.total_size,
                });
            }
            while let Some(frame) = self.deferred.pop_front() {
                self.write_frame(&frame).await?;
            }
        }
        Ok(())
    }

    /// Write a response now, or queue it behind the body in flight
    async fn respond(&mut self, frame: Vec<u8>) -> Result<(), NodeError> {
        if self.upload.is_some() {
            self.deferred.push_back(frame);
            return Ok(());
        }
        self.write_frame(&frame).await
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), NodeError> {
        self.writer
            .write_all(frame)
            .await
            .map_err(|e| NodeError::Transport(Cow::Owned(e.to_string())))
    }

    fn emit(&self, event: ServerEvent) {
        emit(&self.events, event);
    }

    fn report(&self, error: NodeError) {
        report(&self.events, Some(self.id), error);
    }
}

fn emit(events: &mpsc::UnboundedSender<ServerEvent>, event: ServerEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Server event receiver dropped");
    }
}

fn report(events: &mpsc::UnboundedSender<ServerEvent>, id: Option<ConnectionId>, error: NodeError) {
    emit(events, ServerEvent::Error { id, error });
}

/// Rejection header; falls back to an empty name if `name` is too long to
/// echo back.
fn rejection_frame(name: &str, code: &RejectCode, message: &str) -> Result<Vec<u8>, NodeError> {
    HeaderFrame::encode_rejection(name, code, message)
        .or_else(|_| HeaderFrame::encode_rejection("", code, message))
        .map_err(NodeError::from)
}

fn not_found_frame(name: &str) -> Result<Vec<u8>, NodeError> {
    FileHeader::not_found(name)
        .encode()
        .or_else(|_| FileHeader::not_found("").encode())
        .map_err(NodeError::from)
}
