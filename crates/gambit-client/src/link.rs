//! One live connection to the server.
//!
//! A [`Link`] owns two background tasks: a reader that routes every
//! incoming frame, and a heartbeat that keeps the server from timing the
//! connection out. Replies go back to whoever is waiting on that
//! `request_id`; everything else comes out of the push receiver handed back
//! by [`Link::open`].
//!
//! The request side is a separate [`Requester`] so a background task can
//! ask the server for something without owning the link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use gambit_protocol::{
    ClientMessage, Codec, Envelope, JsonCodec, ProtocolError, ServerMessage, PROTOCOL_VERSION,
};
use gambit_transport::{Connection, Connector, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{ClientConfig, ClientError};

/// Requests waiting for a reply. `None` once the reader has stopped, so a
/// late request fails fast instead of waiting out its timeout.
type Pending = Arc<StdMutex<Option<HashMap<u64, oneshot::Sender<ServerMessage>>>>>;

/// Frames from the server that aren't replies.
pub(crate) type Pushes = mpsc::UnboundedReceiver<ServerMessage>;

/// The sending half, shared with the heartbeat task.
struct Outbound<Conn> {
    conn: Arc<Conn>,
    seq: AtomicU64,
    started: Instant,
    codec: JsonCodec,
}

impl<Conn: Connection> Outbound<Conn> {
    async fn send(&self, payload: ClientMessage) -> Result<(), ClientError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let timestamp = self.started.elapsed().as_millis() as u64;
        let bytes = self.codec.encode(&Envelope::new(seq, timestamp, payload))?;
        self.conn.send(&bytes).await?;
        Ok(())
    }
}

/// Sends requests and waits for their replies. Clones share the link.
pub(crate) struct Requester<Conn> {
    outbound: Arc<Outbound<Conn>>,
    pending: Pending,
    next_request: Arc<AtomicU64>,
}

impl<Conn> Clone for Requester<Conn> {
    fn clone(&self) -> Self {
        Self {
            outbound: Arc::clone(&self.outbound),
            pending: Arc::clone(&self.pending),
            next_request: Arc::clone(&self.next_request),
        }
    }
}

impl<Conn: Connection> Requester<Conn> {
    /// Sends the request `build` makes from a fresh `request_id` and waits
    /// for the matching reply. An `Error` reply becomes a typed error.
    pub(crate) async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
        timeout: Duration,
    ) -> Result<ServerMessage, ClientError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(waiting) => {
                waiting.insert(request_id, tx);
            }
            None => return Err(link_closed()),
        }

        let exchange = async {
            self.outbound.send(build(request_id)).await?;
            rx.await.map_err(|_| link_closed())
        };
        let reply = match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => Err(ClientError::Timeout("reply")),
        };
        if reply.is_err() {
            if let Some(waiting) = lock(&self.pending).as_mut() {
                waiting.remove(&request_id);
            }
        }

        match reply? {
            ServerMessage::Error { kind, message, .. } => Err(ClientError::from_remote(kind, message)),
            reply => Ok(reply),
        }
    }
}

pub(crate) struct Link<Conn: Connection> {
    requester: Requester<Conn>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl<Conn: Connection> Link<Conn> {
    /// Dials, handshakes and starts the background tasks, all within
    /// `connect_timeout`.
    pub(crate) async fn open<K>(
        connector: &K,
        config: &ClientConfig,
    ) -> Result<(Self, Pushes), ClientError>
    where
        K: Connector<Connection = Conn>,
    {
        let opening = async {
            let conn = connector.connect().await?;
            Self::establish(conn, config.heartbeat_interval).await
        };
        tokio::time::timeout(config.connect_timeout, opening)
            .await
            .map_err(|_| ClientError::Timeout("connect"))?
    }

    async fn establish(conn: Conn, heartbeat_every: Duration) -> Result<(Self, Pushes), ClientError> {
        let outbound = Arc::new(Outbound {
            conn: Arc::new(conn),
            seq: AtomicU64::new(1),
            started: Instant::now(),
            codec: JsonCodec,
        });

        outbound
            .send(ClientMessage::Handshake {
                version: PROTOCOL_VERSION,
            })
            .await?;
        let ack = match outbound.conn.recv().await? {
            Some(data) => outbound.codec.decode::<Envelope<ServerMessage>>(&data)?,
            None => {
                return Err(TransportError::ConnectionClosed(
                    "server closed the connection during handshake".into(),
                )
                .into());
            }
        };
        match ack.payload {
            ServerMessage::HandshakeAck { server_time } => {
                tracing::debug!(conn_id = %outbound.conn.id(), server_time, "handshake complete");
            }
            ServerMessage::Error { kind, message, .. } => {
                let _ = outbound.conn.close().await;
                return Err(ClientError::from_remote(kind, message));
            }
            other => {
                let _ = outbound.conn.close().await;
                return Err(unexpected("HandshakeAck", other));
            }
        }

        let pending: Pending = Arc::new(StdMutex::new(Some(HashMap::new())));
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            Arc::clone(&outbound.conn),
            Arc::clone(&pending),
            push_tx,
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&outbound), heartbeat_every));

        let link = Self {
            requester: Requester {
                outbound,
                pending,
                next_request: Arc::new(AtomicU64::new(1)),
            },
            reader,
            heartbeat,
        };
        Ok((link, push_rx))
    }

    pub(crate) async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
        timeout: Duration,
    ) -> Result<ServerMessage, ClientError> {
        self.requester.request(build, timeout).await
    }

    pub(crate) fn requester(&self) -> Requester<Conn> {
        self.requester.clone()
    }

    /// `false` once the reader has seen the connection end.
    pub(crate) fn is_alive(&self) -> bool {
        // The reader drops the pending map before it drops the push sender,
        // so this is already false by the time `LinkLost` is reported.
        lock(&self.requester.pending).is_some() && !self.reader.is_finished()
    }

    /// Says goodbye and closes the connection.
    pub(crate) async fn close(self) {
        self.heartbeat.abort();
        let outbound = &self.requester.outbound;
        let _ = outbound
            .send(ClientMessage::Disconnect {
                reason: "client disconnect".into(),
            })
            .await;
        let _ = outbound.conn.close().await;
        self.reader.abort();
        lock(&self.requester.pending).take();
    }
}

impl<Conn: Connection> Drop for Link<Conn> {
    fn drop(&mut self) {
        self.reader.abort();
        self.heartbeat.abort();
    }
}

pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn link_closed() -> ClientError {
    TransportError::ConnectionClosed("link closed before reply".into()).into()
}

/// A reply of the wrong type for the request that was sent.
pub(crate) fn unexpected(expected: &str, got: ServerMessage) -> ClientError {
    ProtocolError::InvalidMessage(format!("expected {expected}, got {got:?}")).into()
}

async fn read_loop<Conn: Connection>(
    conn: Arc<Conn>,
    pending: Pending,
    pushes: mpsc::UnboundedSender<ServerMessage>,
) {
    let codec = JsonCodec;
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(conn_id = %conn.id(), "server closed the connection");
                break;
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "connection lost");
                break;
            }
        };
        let msg = match codec.decode::<Envelope<ServerMessage>>(&data) {
            Ok(envelope) => envelope.payload,
            Err(e) => {
                tracing::warn!(conn_id = %conn.id(), error = %e, "undecodable frame from server");
                continue;
            }
        };

        let waiter = msg
            .request_id()
            .and_then(|id| lock(&pending).as_mut().and_then(|waiting| waiting.remove(&id)));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(msg);
            }
            None => {
                let _ = pushes.send(msg);
            }
        }
    }
    // Dropping the senders wakes every waiter with an error.
    lock(&pending).take();
}

async fn heartbeat_loop<Conn: Connection>(outbound: Arc<Outbound<Conn>>, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires at once; the handshake just proved liveness.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let client_time = outbound.started.elapsed().as_millis() as u64;
        if outbound
            .send(ClientMessage::Heartbeat { client_time })
            .await
            .is_err()
        {
            break;
        }
    }
}
