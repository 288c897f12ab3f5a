//! In-process transport built on Tokio channels.
//!
//! [`memory_transport`] returns a server-side [`MemoryTransport`] and a
//! cloneable [`MemoryConnector`]. Every `connect()` creates a linked pair of
//! [`MemoryConnection`]s and hands the server half to `accept()`.
//!
//! The connector can also misbehave on purpose: [`MemoryConnector::sever_all`]
//! drops every live link (both ends see a receive error, as after a network
//! failure) and [`MemoryConnector::set_refusing`] makes new dials fail.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{mpsc, watch, Mutex};

use crate::{next_connection_id, Connection, ConnectionId, Connector, Transport, TransportError};

/// Creates a connected transport/connector pair.
///
/// `backlog` bounds how many dialed connections may wait for `accept()`.
pub fn memory_transport(backlog: usize) -> (MemoryTransport, MemoryConnector) {
    let (tx, rx) = mpsc::channel(backlog);
    let transport = MemoryTransport { incoming: rx };
    let connector = MemoryConnector {
        outgoing: tx,
        links: Arc::new(StdMutex::new(Vec::new())),
        refusing: Arc::new(AtomicBool::new(false)),
    };
    (transport, connector)
}

/// Server side of the in-memory transport.
pub struct MemoryTransport {
    incoming: mpsc::Receiver<MemoryConnection>,
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        // Every connector clone dropped: nothing can ever arrive again.
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Client side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::Sender<MemoryConnection>,
    links: Arc<StdMutex<Vec<Weak<watch::Sender<bool>>>>>,
    refusing: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Severs every link dialed through this connector so far.
    ///
    /// Both halves of each pair fail their next (or pending) `recv` and
    /// `send` with [`TransportError::ConnectionClosed`].
    pub fn sever_all(&self) {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        for link in links.drain(..) {
            if let Some(severed) = link.upgrade() {
                severed.send_replace(true);
            }
        }
        tracing::debug!("severed all in-memory links");
    }

    /// While `true`, every `connect()` fails with
    /// [`TransportError::ConnectFailed`].
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "in-memory transport is refusing connections",
            )));
        }

        let (client, server, severed) = MemoryConnection::pair();
        {
            let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
            links.retain(|link| link.strong_count() > 0);
            links.push(Arc::downgrade(&severed));
        }

        self.outgoing.send(server).await.map_err(|_| {
            TransportError::ConnectFailed(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "in-memory transport is gone",
            ))
        })?;
        Ok(client)
    }
}

/// One end of an in-memory link.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// Flipped by our own `close()`.
    closed: watch::Sender<bool>,
    /// Shared with the peer; flipped by `MemoryConnector::sever_all`.
    severed: Arc<watch::Sender<bool>>,
}

impl MemoryConnection {
    fn pair() -> (Self, Self, Arc<watch::Sender<bool>>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let severed = Arc::new(watch::Sender::new(false));

        let a = Self::half(a_tx, a_rx, Arc::clone(&severed));
        let b = Self::half(b_tx, b_rx, Arc::clone(&severed));
        (a, b, severed)
    }

    fn half(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        severed: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            id: next_connection_id(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: watch::Sender::new(false),
            severed,
        }
    }

    fn severed_error() -> TransportError {
        TransportError::ConnectionClosed("link severed".into())
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if *self.severed.borrow() {
            return Err(Self::severed_error());
        }
        let tx = self.tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx
                .send(data.to_vec())
                .map_err(|_| TransportError::ConnectionClosed("peer hung up".into())),
            None => Err(TransportError::ConnectionClosed("connection closed locally".into())),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        // Subscribe before checking so a close/sever racing with us is seen
        // either by the check or by `changed()`.
        let mut closed = self.closed.subscribe();
        let mut severed = self.severed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        if *severed.borrow_and_update() {
            return Err(Self::severed_error());
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            msg = rx.recv() => Ok(msg),
            _ = closed.changed() => Ok(None),
            _ = severed.changed() => Err(Self::severed_error()),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        // Dropping our sender lets the peer observe a clean close.
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
