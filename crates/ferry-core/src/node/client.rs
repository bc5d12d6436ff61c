//! Client engine: one connection to a ferry server.
//!
//! The engine owns the socket, the [`TransferSession`] and the destination
//! file of the current download. A background reader task feeds received
//! bytes into the session and turns its output into [`ClientEvent`]s.

use super::config::ClientConfig;
use super::error::{NodeError, Result};
use super::event::ClientEvent;
use crate::error::FrameError;
use crate::frame::Command;
use crate::session::{Aborted, SessionEvent, TransferSession, TransferState};
use ferry_files::{DestinationFile, validate_file_name};
use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Destination of the download in progress
struct ActiveDownload {
    name: String,
    file: DestinationFile,
}

/// Connection state guarded by the engine mutex
struct ClientState {
    session: TransferSession,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    download: Option<ActiveDownload>,
    peer: Option<SocketAddr>,
    /// Bumped on every connect and teardown so a stale reader task can
    /// recognise that its connection is gone
    generation: u64,
}

struct ClientInner {
    config: ClientConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
    connecting: AtomicBool,
    connected: AtomicBool,
    state: Mutex<ClientState>,
}

/// Client side of the protocol
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ClientEngine {
    inner: Arc<ClientInner>,
}

/// Clears the in-flight flag when a connect attempt ends
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ClientEngine {
    /// Create an engine and the receiver for its events
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ClientState {
            session: TransferSession::with_max_list_size(config.max_list_size),
            writer: None,
            reader: None,
            download: None,
            peer: None,
            generation: 0,
        };
        let inner = ClientInner {
            config,
            events: tx,
            connecting: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            state: Mutex::new(state),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Check if a connection is established
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Current exchange on the connection
    pub async fn state(&self) -> TransferState {
        self.inner.state.lock().await.session.state()
    }

    /// Address of the connected server
    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().await.peer
    }

    /// Connect to `host:port`.
    ///
    /// Failures are returned and also delivered as an `Error` event.
    ///
    /// # Errors
    ///
    /// - `NodeError::ConnectInProgress` / `NodeError::AlreadyConnected`
    /// - `NodeError::ConnectionRefused`, `NodeError::HostUnreachable` or
    ///   `NodeError::Timeout` if the attempt fails
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NodeError::ConnectInProgress);
        }
        let _guard = ConnectingGuard(&self.inner.connecting);

        if self.is_connected() {
            return Err(NodeError::AlreadyConnected);
        }

        let target = format!("{host}:{port}");
        tracing::info!("Connecting to {}", target);

        let attempt = tokio::time::timeout(
            self.inner.config.connect_timeout,
            TcpStream::connect((host, port)),
        )
        .await;

        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.inner.connect_failed(connect_error(&target, &e))),
            Err(_) => {
                let err = NodeError::Timeout(Cow::Owned(format!(
                    "connecting to {target} after {:?}",
                    self.inner.config.connect_timeout
                )));
                return Err(self.inner.connect_failed(err));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        let generation = state.generation;
        state.writer = Some(write_half);
        state.peer = peer;
        state.reader = Some(tokio::spawn(read_loop(
            Arc::clone(&self.inner),
            read_half,
            generation,
        )));
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.emit(ClientEvent::ConnectionStateChanged(true));

        tracing::info!("Connected to {}", target);
        Ok(())
    }

    /// Close the connection.
    ///
    /// A download in progress is reported as `TransferInterrupted` and its
    /// partial file is left on disk. Does nothing when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.writer.is_none() {
            return Ok(());
        }

        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        self.inner.close_connection(&mut state, "disconnected").await;
        Ok(())
    }

    /// Ask the server for its listing.
    ///
    /// # Errors
    ///
    /// - `NodeError::NotConnected` without a connection
    /// - `NodeError::TransferInProgress` if another exchange is outstanding
    /// - `NodeError::Transport` if the command cannot be sent
    pub async fn request_list(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_ready(&state)?;

        state.session.begin_list_request()?;
        tracing::debug!("Requesting file list");
        self.inner.send_command(&mut state, &Command::List).await
    }

    /// Download `name` into `destination_dir`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// - `NodeError::NotConnected` without a connection
    /// - `NodeError::TransferInProgress` if another exchange is outstanding
    /// - `NodeError::Protocol` with `UnsafeName` if `name` is not a bare
    ///   file name
    /// - `NodeError::Io` if the destination cannot be created
    /// - `NodeError::Transport` if the command cannot be sent
    pub async fn request_file(&self, name: &str, destination_dir: impl AsRef<Path>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_ready(&state)?;
        validate_file_name(name)?;

        let file = DestinationFile::create(destination_dir, name).await?;
        state.session.begin_download(name)?;
        state.download = Some(ActiveDownload {
            name: name.to_string(),
            file,
        });

        tracing::debug!("Requesting file {:?}", name);
        self.inner
            .send_command(&mut state, &Command::Get(name.to_string()))
            .await
    }

    /// Abandon the download in progress and drop the connection.
    ///
    /// Emits `Cancelled` then `ConnectionStateChanged(false)`. Does nothing
    /// when no download is outstanding.
    pub async fn cancel(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !matches!(
            state.session.state(),
            TransferState::AwaitingFileHeader | TransferState::ReceivingFileBody
        ) {
            return Ok(());
        }

        if let Some(reader) = state.reader.take() {
            reader.abort();
        }

        let bytes_received = match state.session.abort() {
            Aborted::Download(download) => download.bytes_received,
            _ => 0,
        };
        if let Some(download) = state.download.take() {
            let name = download.name;
            if let Some(path) = download.file.abandon().await {
                tracing::debug!("Keeping partial file {:?}", path);
            }
            tracing::info!("Cancelled download of {:?} at {} bytes", name, bytes_received);
            self.inner.emit(ClientEvent::Cancelled {
                name,
                bytes_received,
            });
        }

        self.inner.drop_transport(&mut state).await;
        Ok(())
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Client event receiver dropped");
        }
    }

    fn connect_failed(&self, err: NodeError) -> NodeError {
        tracing::warn!("Connect failed: {}", err);
        self.emit(ClientEvent::Error(err.clone()));
        err
    }

    fn require_ready(&self, state: &ClientState) -> Result<()> {
        if state.writer.is_none() {
            return Err(NodeError::NotConnected);
        }
        if !state.session.is_idle() {
            return Err(NodeError::TransferInProgress(Cow::Owned(format!(
                "{:?}",
                state.session.state()
            ))));
        }
        Ok(())
    }

    async fn send_command(&self, state: &mut ClientState, command: &Command) -> Result<()> {
        let Some(writer) = state.writer.as_mut() else {
            return Err(NodeError::NotConnected);
        };

        if let Err(e) = writer.write_all(&command.encode()).await {
            tracing::warn!("Failed to send command: {}", e);
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }
            self.close_connection(state, "send failed").await;
            return Err(NodeError::Transport(Cow::Owned(e.to_string())));
        }
        Ok(())
    }

    /// Feed received bytes into the session and act on its output
    async fn process(&self, state: &mut ClientState, data: &[u8]) {
        let events = state.session.feed(data);

        for event in events {
            match event {
                SessionEvent::ListReceived(files) => {
                    tracing::debug!("Received list of {} files", files.len());
                    self.emit(ClientEvent::ListReceived(files));
                }
                SessionEvent::HeaderAccepted { name, size } => {
                    tracing::debug!("Receiving {:?} ({} bytes)", name, size);
                    let Some(download) = state.download.as_mut() else {
                        continue;
                    };
                    if let Err(e) = download.file.begin().await {
                        let err = NodeError::file_io(&download.name, 0, e);
                        self.write_failed(state, err).await;
                        return;
                    }
                }
                SessionEvent::Body(bytes) => {
                    let Some(download) = state.download.as_mut() else {
                        continue;
                    };
                    if let Err(e) = download.file.write(&bytes).await {
                        let err =
                            NodeError::file_io(&download.name, download.file.written(), e);
                        self.write_failed(state, err).await;
                        return;
                    }
                }
                SessionEvent::Progress {
                    name,
                    bytes_received,
                    expected_size,
                    percent,
                } => {
                    self.emit(ClientEvent::Progress {
                        name,
                        percent,
                        bytes_received,
                        expected_size,
                    });
                }
                SessionEvent::Completed { name, size } => {
                    let Some(download) = state.download.take() else {
                        continue;
                    };
                    match download.file.finish().await {
                        Ok(path) => {
                            tracing::info!("Received {:?} ({} bytes) at {:?}", name, size, path);
                            self.emit(ClientEvent::FileReceived { name, size });
                        }
                        Err(e) => {
                            self.emit(ClientEvent::Error(NodeError::file_io(&name, size, e)));
                        }
                    }
                }
                SessionEvent::Failed(err) => {
                    tracing::warn!("Exchange failed: {}", err);
                    if let Some(download) = state.download.take() {
                        download.file.abandon().await;
                    }
                    self.emit(ClientEvent::Error(err.into()));
                }
                SessionEvent::Discarded(n) => {
                    tracing::debug!("Dropped {} bytes outside the current exchange", n);
                }
            }
        }
    }

    /// A body write failed; the rest of the body can no longer be consumed
    /// in sync, so the connection is dropped after reporting the error.
    async fn write_failed(&self, state: &mut ClientState, err: NodeError) {
        tracing::warn!("{}", err);
        state.session.abort();
        if let Some(download) = state.download.take() {
            download.file.abandon().await;
        }
        self.emit(ClientEvent::Error(err));
        state.reader.take();
        self.drop_transport(state).await;
    }

    /// Tear down the connection, reporting any exchange it interrupts.
    ///
    /// The caller decides what to do with the reader task before calling.
    async fn close_connection(&self, state: &mut ClientState, reason: &str) {
        tracing::debug!("Closing connection: {}", reason);

        match state.session.abort() {
            Aborted::Nothing => {}
            Aborted::List => {
                self.emit(ClientEvent::Error(NodeError::Frame(FrameError::Malformed(
                    format!("connection closed before list response completed ({reason})"),
                ))));
            }
            Aborted::Download(download) => {
                if let Some(active) = state.download.take() {
                    if let Some(path) = active.file.abandon().await {
                        tracing::info!("Partial file left at {:?}", path);
                    }
                }
                self.emit(ClientEvent::Error(NodeError::TransferInterrupted {
                    name: download.requested_name,
                    bytes_received: download.bytes_received,
                    expected_size: download.expected_size,
                }));
            }
        }

        self.drop_transport(state).await;
    }

    /// Close the socket and announce the disconnect
    async fn drop_transport(&self, state: &mut ClientState) {
        state.generation += 1;
        state.peer = None;
        if let Some(mut writer) = state.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Socket shutdown: {}", e);
            }
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(ClientEvent::ConnectionStateChanged(false));
        }
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut reader: OwnedReadHalf, generation: u64) {
    let mut buf = vec![0u8; inner.config.read_buffer_size.max(1)];

    loop {
        let result = reader.read(&mut buf).await;

        let mut state = inner.state.lock().await;
        if state.generation != generation {
            return;
        }

        match result {
            Ok(0) => {
                // Our own handle: detach rather than abort
                state.reader.take();
                inner.close_connection(&mut state, "closed by server").await;
                return;
            }
            Ok(n) => {
                inner.process(&mut state, &buf[..n]).await;
                if state.generation != generation {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Read failed: {}", e);
                state.reader.take();
                inner.close_connection(&mut state, "read failed").await;
                return;
            }
        }
    }
}

fn connect_error(target: &str, err: &io::Error) -> NodeError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => NodeError::ConnectionRefused(target.to_string()),
        io::ErrorKind::TimedOut => NodeError::Timeout(Cow::Owned(format!("connecting to {target}"))),
        _ => NodeError::HostUnreachable {
            addr: target.to_string(),
            reason: err.to_string(),
        },
    }
}
