//! Server engine: accepts clients and serves one shared directory.

use super::config::ServerConfig;
use super::connection::Connection;
use super::error::{NodeError, Result};
use super::event::{ConnectionId, ServerEvent};
use crate::frame::FileEntry;
use dashmap::DashMap;
use ferry_files::SharedDirectory;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State that exists only while listening
struct Listening {
    local_addr: SocketAddr,
    shared: Arc<SharedDirectory>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

struct ServerInner {
    config: ServerConfig,
    events: mpsc::UnboundedSender<ServerEvent>,
    running: AtomicBool,
    next_id: AtomicU64,
    /// Live connections (id -> peer address)
    connections: DashMap<ConnectionId, SocketAddr>,
    listening: Mutex<Option<Listening>>,
}

/// Server side of the protocol
///
/// Cheap to clone; clones control the same listener.
#[derive(Clone)]
pub struct ServerEngine {
    inner: Arc<ServerInner>,
}

impl ServerEngine {
    /// Create an engine and the receiver for its events
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = ServerInner {
            config,
            events: tx,
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            listening: Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Listen on `port` and serve the files in `shared_dir`.
    ///
    /// The directory must already exist. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// - `NodeError::InvalidState` if already running
    /// - `NodeError::InvalidConfig` for an unusable configuration
    /// - `NodeError::SharedDirectory` if `shared_dir` is not a directory
    /// - `NodeError::Bind` if the port cannot be bound
    pub async fn start(&self, port: u16, shared_dir: impl AsRef<Path>) -> Result<SocketAddr> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NodeError::invalid_state("Server already running"));
        }

        match self.listen(port, shared_dir.as_ref()).await {
            Ok(addr) => Ok(addr),
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn listen(&self, port: u16, shared_dir: &Path) -> Result<SocketAddr> {
        self.inner.config.validate()?;

        let shared = SharedDirectory::open(shared_dir)
            .map_err(|e| NodeError::SharedDirectory(e.to_string()))?;

        let bind_addr = SocketAddr::new(self.inner.config.bind_ip, port);
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| NodeError::Bind {
            addr: bind_addr.to_string(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(shared);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            Arc::clone(&self.inner),
            listener,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        *self.inner.listening.lock().await = Some(Listening {
            local_addr,
            shared,
            shutdown,
            accept_task,
        });

        tracing::info!("Serving {:?} on {}", shared_dir, local_addr);
        self.inner.emit(ServerEvent::Started { addr: local_addr });
        Ok(local_addr)
    }

    /// Close every connection and stop listening
    ///
    /// # Errors
    ///
    /// Returns `NodeError::InvalidState` if the server is not running.
    pub async fn stop(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NodeError::invalid_state("Server not running"));
        }

        let Some(listening) = self.inner.listening.lock().await.take() else {
            return Ok(());
        };

        // Receivers may already be gone if every task has exited
        let _ = listening.shutdown.send(true);
        if let Err(e) = listening.accept_task.await {
            tracing::warn!("Accept task ended abnormally: {}", e);
        }

        tracing::info!("Server stopped");
        self.inner.emit(ServerEvent::Stopped);
        Ok(())
    }

    /// Check if the server is listening
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .listening
            .lock()
            .await
            .as_ref()
            .map(|l| l.local_addr)
    }

    /// Number of connected clients
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Current contents of the shared directory, as a client would list them
    ///
    /// # Errors
    ///
    /// - `NodeError::InvalidState` if the server is not running
    /// - `NodeError::Io` if the directory cannot be read
    pub async fn shared_files(&self) -> Result<Vec<FileEntry>> {
        let shared = self
            .inner
            .listening
            .lock()
            .await
            .as_ref()
            .map(|l| Arc::clone(&l.shared))
            .ok_or(NodeError::invalid_state("Server not running"))?;

        let files = shared.scan().await?;
        Ok(files.into_iter().map(FileEntry::from).collect())
    }
}

impl ServerInner {
    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Server event receiver dropped");
        }
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    shared: Arc<SharedDirectory>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
                    tracing::info!("Connection {} from {}", id, peer);
                    inner.connections.insert(id, peer);
                    inner.emit(ServerEvent::ClientConnected { id, peer });

                    let connection = Connection::new(
                        id,
                        stream,
                        peer,
                        Arc::clone(&shared),
                        &inner.config,
                        inner.events.clone(),
                        shutdown.clone(),
                    );
                    let inner = Arc::clone(&inner);
                    tasks.spawn(async move {
                        connection.run().await;
                        inner.connections.remove(&id);
                        tracing::info!("Connection {} from {} closed", id, peer);
                        inner.emit(ServerEvent::ClientDisconnected { id, peer });
                    });
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    inner.emit(ServerEvent::Error {
                        id: None,
                        error: NodeError::from(e),
                    });
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!("Connection task ended abnormally: {}", e);
                }
            }
        }
    }

    drop(listener);
    tracing::debug!("Waiting for {} connections to close", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("Connection task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_ip: "127.0.0.1".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_start_stop() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = ServerEngine::new(local_config());
        assert!(!server.is_running());

        let addr = server.start(0, dir.path()).await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr().await, Some(addr));
        assert_eq!(next(&mut rx).await, ServerEvent::Started { addr });

        assert!(server.start(0, dir.path()).await.is_err());

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert_eq!(next(&mut rx).await, ServerEvent::Stopped);
        assert!(server.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let (server, _rx) = ServerEngine::new(local_config());
        let err = server.start(0, dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, NodeError::SharedDirectory(_)));
        assert!(!dir.path().join("absent").exists());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let dir = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (server, _rx) = ServerEngine::new(local_config());
        let err = server.start(port, dir.path()).await.unwrap_err();
        assert!(matches!(err, NodeError::Bind { .. }));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_shared_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b"), b"22").unwrap();
        std::fs::write(dir.path().join("a"), b"1").unwrap();

        let (server, _rx) = ServerEngine::new(local_config());
        assert!(server.shared_files().await.is_err());
        server.start(0, dir.path()).await.unwrap();
        assert_eq!(
            server.shared_files().await.unwrap(),
            vec![FileEntry::new("a", 1), FileEntry::new("b", 2)]
        );
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_get_and_disconnect_events() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world!").unwrap();

        let (server, mut rx) = ServerEngine::new(local_config());
        let addr = server.start(0, dir.path()).await.unwrap();
        next(&mut rx).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next(&mut rx).await, ServerEvent::ClientConnected { .. }));
        assert_eq!(server.connection_count(), 1);

        client.write_all(b"GET a.txt").await.unwrap();
        let mut response = vec![0u8; crate::HEADER_SIZE + 12];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response[crate::HEADER_SIZE..], b"hello world!");

        drop(client);
        loop {
            if let ServerEvent::ClientDisconnected { .. } = next(&mut rx).await {
                break;
            }
        }
        assert_eq!(server.connection_count(), 0);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_scan_closes_connection() {
        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("shared");
        std::fs::create_dir(&shared).unwrap();

        let (server, mut rx) = ServerEngine::new(local_config());
        let addr = server.start(0, &shared).await.unwrap();
        next(&mut rx).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next(&mut rx).await, ServerEvent::ClientConnected { .. }));
        std::fs::remove_dir(&shared).unwrap();

        client.write_all(b"LIST").await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0, "no listing may be sent");

        let mut saw_error = false;
        loop {
            match next(&mut rx).await {
                ServerEvent::Error { id: Some(_), .. } => saw_error = true,
                ServerEvent::ClientDisconnected { .. } => break,
                ServerEvent::ListServed { .. } => panic!("listing served after failed scan"),
                _ => {}
            }
        }
        assert!(saw_error);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_clients() {
        let dir = TempDir::new().unwrap();
        let (server, _rx) = ServerEngine::new(local_config());
        let addr = server.start(0, dir.path()).await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.stop().await.unwrap();

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
