//! Transport abstraction layer for Gambit.
//!
//! Provides the [`Transport`], [`Connection`] and [`Connector`] traits that
//! abstract over how bytes move between a client and the server. The
//! protocol layer above only ever sees whole messages (`Vec<u8>`).
//!
//! Two implementations ship with the crate:
//!
//! - WebSocket (`websocket` feature, default) via `tokio-tungstenite`, with
//!   both the server side ([`WebSocketTransport`]) and a client dialer
//!   ([`WebSocketConnector`]).
//! - An in-process transport ([`memory_transport`]) used for embedding and
//!   for tests that need to sever links on demand.
//!
//! All trait methods return `Send` futures so generic code can be driven
//! from spawned Tokio tasks.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{memory_transport, MemoryConnection, MemoryConnector, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs across all transports.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections (server side).
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    ///
    /// Returns [`TransportError::Shutdown`] once no further connections can
    /// ever arrive.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Opens outgoing connections (client side).
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Dials the remote endpoint.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that can send and receive whole messages.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. The future
    /// is cancel-safe: dropping it never loses a message.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
