//! Client and server engines
//!
//! This module puts the framing and session layers on real sockets:
//! - [`ClientEngine`]: one connection, one exchange at a time, driven by a
//!   UI or CLI through plain method calls
//! - [`ServerEngine`]: a listener plus one independent responder task per
//!   accepted connection
//!
//! Both engines report what happens through an unbounded event channel
//! returned by their constructor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                 ┌──────────────────────────┐
//! │     ClientEngine     │   LIST / GET    │       ServerEngine       │
//! │  (TransferSession,   │ ──────────────▶ │  accept loop             │
//! │   DestinationFile)   │                 │   └─ Connection per peer │
//! │                      │ ◀────────────── │      (ActiveUpload,      │
//! │  reader task         │  list / header  │       SharedDirectory)   │
//! └──────────┬───────────┘   + body        └────────────┬─────────────┘
//!            ▼                                          ▼
//!       ClientEvent                                ServerEvent
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ferry_core::node::{ClientConfig, ClientEngine, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, mut events) = ClientEngine::new(ClientConfig::default());
//!     client.connect("127.0.0.1", 8000).await?;
//!     client.request_file("report.pdf", "downloads").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Progress { percent, .. } => println!("{percent}%"),
//!             ClientEvent::FileReceived { .. } | ClientEvent::Error(_) => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod event;
pub mod server;

pub use client::ClientEngine;
pub use config::{ClientConfig, ServerConfig};
pub use error::{NodeError, Result};
pub use event::{ClientEvent, ConnectionId, ServerEvent};
pub use server::ServerEngine;
