//! Loopback fixture: one server and one client on 127.0.0.1
//!
//! The server shares a fresh temporary directory and listens on an
//! ephemeral port, so fixtures can be created concurrently.
//!
//! # Example
//!
//! ```no_run
//! use ferry_integration_tests::fixtures::{LoopbackFixture, next_client_event};
//!
//! # async fn example() {
//! let mut fixture = LoopbackFixture::new().await.unwrap();
//! fixture.share("a.txt", b"hello");
//! fixture.connect().await.unwrap();
//!
//! fixture.client.request_list().await.unwrap();
//! let event = next_client_event(&mut fixture.client_events).await;
//! // ... assert on event ...
//!
//! fixture.cleanup().await.unwrap();
//! # }
//! ```

use ferry_core::node::{
    ClientConfig, ClientEngine, ClientEvent, NodeError, ServerConfig, ServerEngine, ServerEvent,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// How long a test waits for any single event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for the next client event, panicking on timeout or a closed channel
pub async fn next_client_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client event channel closed")
}

/// Wait for the next server event, panicking on timeout or a closed channel
pub async fn next_server_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("server event channel closed")
}

/// Running server plus an (initially unconnected) client
pub struct LoopbackFixture {
    pub server: ServerEngine,
    pub server_events: UnboundedReceiver<ServerEvent>,
    pub client: ClientEngine,
    pub client_events: UnboundedReceiver<ClientEvent>,
    pub addr: SocketAddr,
    shared: TempDir,
    downloads: TempDir,
}

impl LoopbackFixture {
    /// Start a server on an empty shared directory
    ///
    /// # Errors
    ///
    /// Returns the engine error if the server cannot start.
    pub async fn new() -> Result<Self, NodeError> {
        Self::new_with_config(ServerConfig::default(), ClientConfig::default()).await
    }

    /// Start a server with custom engine configurations
    ///
    /// The server always binds to loopback, whatever `server_config` says.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the server cannot start.
    pub async fn new_with_config(
        server_config: ServerConfig,
        client_config: ClientConfig,
    ) -> Result<Self, NodeError> {
        let shared = TempDir::new()?;
        let downloads = TempDir::new()?;

        let (server, mut server_events) = ServerEngine::new(ServerConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            ..server_config
        });
        let addr = server.start(0, shared.path()).await?;

        // Consume Started so tests see only what they cause
        match next_server_event(&mut server_events).await {
            ServerEvent::Started { .. } => {}
            other => panic!("expected Started, got {other:?}"),
        }

        let (client, client_events) = ClientEngine::new(client_config);

        Ok(Self {
            server,
            server_events,
            client,
            client_events,
            addr,
            shared,
            downloads,
        })
    }

    /// Write a file into the shared directory
    pub fn share(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.shared.path().join(name);
        std::fs::write(&path, contents).expect("write shared file");
        path
    }

    /// Shared directory
    pub fn shared_dir(&self) -> &Path {
        self.shared.path()
    }

    /// Directory downloads are written to
    pub fn download_dir(&self) -> &Path {
        self.downloads.path()
    }

    /// Connect the client and wait for both sides to see it
    ///
    /// # Errors
    ///
    /// Returns the engine error if the connection fails.
    pub async fn connect(&mut self) -> Result<(), NodeError> {
        self.client.connect("127.0.0.1", self.addr.port()).await?;

        match next_client_event(&mut self.client_events).await {
            ClientEvent::ConnectionStateChanged(true) => {}
            other => panic!("expected ConnectionStateChanged(true), got {other:?}"),
        }
        match next_server_event(&mut self.server_events).await {
            ServerEvent::ClientConnected { .. } => {}
            other => panic!("expected ClientConnected, got {other:?}"),
        }
        Ok(())
    }

    /// Collect client events up to and including the first one `done`
    /// accepts
    pub async fn client_events_until(
        &mut self,
        mut done: impl FnMut(&ClientEvent) -> bool,
    ) -> Vec<ClientEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_client_event(&mut self.client_events).await;
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    /// Disconnect the client and stop the server
    ///
    /// # Errors
    ///
    /// Returns the engine error if the server was already stopped.
    pub async fn cleanup(self) -> Result<(), NodeError> {
        self.client.disconnect().await?;
        self.server.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_creation() {
        let fixture = LoopbackFixture::new().await.unwrap();
        assert!(fixture.server.is_running());
        assert_ne!(fixture.addr.port(), 0);
        assert!(!fixture.client.is_connected());
        fixture.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_fixture_connect() {
        let mut fixture = LoopbackFixture::new().await.unwrap();
        fixture.connect().await.unwrap();
        assert!(fixture.client.is_connected());
        assert_eq!(fixture.server.connection_count(), 1);
        fixture.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_fixtures_run_concurrently() {
        let (a, b) = tokio::join!(LoopbackFixture::new(), LoopbackFixture::new());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.addr, b.addr);
        assert_ne!(a.shared_dir(), b.shared_dir());
        a.cleanup().await.unwrap();
        b.cleanup().await.unwrap();
    }
}
