//! The per-participant connection state machine.
//!
//! A [`ConnectionManager`] dials the server, handshakes, subscribes to its
//! session and then feeds every move it learns about into one delivery
//! queue, which hands them to the application's [`Inbox`] in order and
//! exactly once.
//!
//! When the link drops, the manager reconnects with exponential backoff,
//! resubscribes from the last sequence it delivered, and resubmits an
//! interrupted move under the same nonce. The server recognises the nonce,
//! so the move is accepted at most once no matter how many times it is sent.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use gambit_protocol::{
    ClientMessage, Coord, MoveEvent, Nonce, ServerMessage, SessionId, SessionSnapshot,
};
use gambit_transport::{Connection, Connector};
use tokio::task::JoinHandle;

use crate::config::Backoff;
use crate::delivery::Delivery;
use crate::link::{link_closed, lock, unexpected, Link, Pushes, Requester};
use crate::{ClientConfig, ClientError, ClientEvent, ConnectionState, Inbox, SessionContext};

/// Keeps one participant connected to one session.
///
/// # Example
///
/// ```rust,no_run
/// use gambit_client::{ClientConfig, ConnectionManager, SessionContext};
/// use gambit_protocol::{Coord, Side};
/// use gambit_transport::WebSocketConnector;
///
/// # async fn play() -> Result<(), gambit_client::ClientError> {
/// let connector = WebSocketConnector::new("ws://127.0.0.1:8080");
/// let context = SessionContext::new("3f2a...", "alice", Side::White);
/// let (mut manager, mut inbox) =
///     ConnectionManager::new(connector, context, ClientConfig::default());
///
/// manager.connect().await?;
/// manager.submit_move(Coord::new(6, 3), Coord::new(4, 3)).await?;
/// while let Some(event) = inbox.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<K: Connector> {
    connector: K,
    context: SessionContext,
    config: ClientConfig,
    state: ConnectionState,
    link: Option<Link<K::Connection>>,
    pump: Option<JoinHandle<()>>,
    delivery: Arc<StdMutex<Delivery>>,
}

impl<K: Connector> ConnectionManager<K> {
    /// Creates a manager in `DISCONNECTED` and the inbox its events go to.
    pub fn new(connector: K, context: SessionContext, config: ClientConfig) -> (Self, Inbox) {
        let (delivery, inbox) = Delivery::new();
        let manager = Self {
            connector,
            context,
            config,
            state: ConnectionState::Disconnected,
            link: None,
            pump: None,
            delivery: Arc::new(StdMutex::new(delivery)),
        };
        (manager, inbox)
    }

    /// The current state. An operation dropped while connecting leaves
    /// the manager `FAILED`.
    pub fn state(&self) -> ConnectionState {
        if self.interrupted() {
            ConnectionState::Failed
        } else {
            self.state
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Highest move sequence delivered to the inbox so far.
    pub fn last_seq(&self) -> u64 {
        lock(&self.delivery).last_seq()
    }

    /// Connects, handshakes and subscribes.
    ///
    /// Moves after [`last_seq`](Self::last_seq) are caught up before live
    /// delivery resumes, so calling this again after `FAILED` or
    /// [`disconnect`](Self::disconnect) loses nothing.
    ///
    /// # Errors
    /// - `InvalidState` unless `DISCONNECTED` or `FAILED`
    /// - `Timeout`/`Transport` if the server can't be reached
    /// - the server's refusal if it rejects the handshake or the subscription
    ///
    /// Every error leaves the manager `FAILED`, except `InvalidState`. So
    /// does dropping the future before it completes; call this again to
    /// start over.
    pub async fn connect(&mut self) -> Result<SessionSnapshot, ClientError> {
        self.settle();
        if !matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return Err(ClientError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }

        self.set_state(ConnectionState::Connecting);
        match self.establish().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.context.session_id,
                    participant_id = %self.context.participant_id,
                    error = %e,
                    "connect failed"
                );
                self.teardown().await;
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Closes the connection. The delivery cursor is kept, so a later
    /// [`connect`](Self::connect) resumes where this left off.
    pub async fn disconnect(&mut self) {
        self.settle();
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Submits a move under a fresh random nonce.
    pub async fn submit_move(&mut self, from: Coord, to: Coord) -> Result<MoveEvent, ClientError> {
        self.submit_move_with_nonce(Nonce::random(), from, to).await
    }

    /// Submits a move under a caller-chosen nonce.
    ///
    /// Resubmitting a nonce the server already accepted returns the
    /// original event; that is success, not an error. If the link fails
    /// mid-submission the manager recovers and resubmits with the same
    /// nonce, up to the retry budget.
    ///
    /// # Errors
    /// - `InvalidState` unless `SUBSCRIBED`
    /// - the server's refusal (`NotActive`, `UnknownParticipant`, ...)
    /// - `RetriesExhausted` once recovery gives up; the manager is `FAILED`
    pub async fn submit_move_with_nonce(
        &mut self,
        nonce: Nonce,
        from: Coord,
        to: Coord,
    ) -> Result<MoveEvent, ClientError> {
        self.settle();
        if !self.state.is_subscribed() {
            return Err(ClientError::InvalidState {
                operation: "submit a move",
                state: self.state,
            });
        }

        let mut retries = 0;
        loop {
            let attempt = match &self.link {
                Some(link) if link.is_alive() => {
                    submit_once(link, &self.context, &self.config, &nonce, from, to).await
                }
                _ => Err(link_closed()),
            };

            match attempt {
                Ok(event) => {
                    lock(&self.delivery).offer(event.clone());
                    return Ok(event);
                }
                Err(e) if e.is_transient() => {
                    retries += 1;
                    if retries > self.config.retry_budget {
                        self.teardown().await;
                        self.set_state(ConnectionState::Failed);
                        return Err(ClientError::RetriesExhausted {
                            attempts: retries,
                            source: Box::new(e),
                        });
                    }
                    tracing::warn!(
                        session_id = %self.context.session_id,
                        %nonce,
                        error = %e,
                        "submission interrupted, recovering"
                    );
                    self.recover(e).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetches and delivers every move after [`last_seq`](Self::last_seq).
    /// Returns how many new moves reached the inbox.
    ///
    /// Useful after dropping a pending submission: the move may or may not
    /// have been accepted, and this settles it.
    pub async fn catch_up(&mut self) -> Result<usize, ClientError> {
        self.settle();
        let link = match (&self.link, self.state) {
            (Some(link), ConnectionState::Subscribed) => link,
            _ => {
                return Err(ClientError::InvalidState {
                    operation: "catch up",
                    state: self.state,
                });
            }
        };

        let after_seq = self.last_seq();
        let reply = link
            .request(
                |request_id| ClientMessage::FetchMoves {
                    request_id,
                    session_id: self.context.session_id.clone(),
                    after_seq,
                },
                self.config.request_timeout,
            )
            .await?;
        let events = match reply {
            ServerMessage::CatchUp { events, .. } => events,
            other => return Err(unexpected("CatchUp", other)),
        };

        let delivered = lock(&self.delivery).offer_all(events);
        tracing::debug!(
            session_id = %self.context.session_id,
            after_seq,
            delivered,
            "caught up"
        );
        Ok(delivered)
    }

    /// Recovers a dropped link: reconnect with backoff, resubscribe and
    /// catch up. Does nothing if the link is healthy.
    ///
    /// # Errors
    /// - `InvalidState` if `DISCONNECTED` or `FAILED`; use `connect()`
    /// - `RetriesExhausted` once the budget is spent; the manager is `FAILED`
    pub async fn resume(&mut self) -> Result<(), ClientError> {
        self.settle();
        if !self.state.is_subscribed() {
            return Err(ClientError::InvalidState {
                operation: "resume",
                state: self.state,
            });
        }
        if self.link.as_ref().is_some_and(|link| link.is_alive()) {
            return Ok(());
        }
        self.recover(link_closed()).await
    }

    /// Dials, handshakes and subscribes from the current cursor.
    async fn establish(&mut self) -> Result<SessionSnapshot, ClientError> {
        let (link, pushes) = Link::open(&self.connector, &self.config).await?;
        self.set_state(ConnectionState::Connected);

        let after_seq = self.last_seq();
        let reply = link
            .request(
                |request_id| ClientMessage::Subscribe {
                    request_id,
                    session_id: self.context.session_id.clone(),
                    participant_id: self.context.participant_id.clone(),
                    after_seq,
                },
                self.config.request_timeout,
            )
            .await?;
        let (snapshot, backlog) = match reply {
            ServerMessage::Subscribed {
                snapshot, backlog, ..
            } => (snapshot, backlog),
            other => return Err(unexpected("Subscribed", other)),
        };

        let caught_up = lock(&self.delivery).offer_all(backlog);
        self.pump = Some(tokio::spawn(pump(
            pushes,
            Arc::clone(&self.delivery),
            link.requester(),
            self.context.session_id.clone(),
            self.config.request_timeout,
        )));
        self.link = Some(link);
        self.set_state(ConnectionState::Subscribed);

        tracing::info!(
            session_id = %self.context.session_id,
            participant_id = %self.context.participant_id,
            after_seq,
            caught_up,
            "subscribed"
        );
        Ok(snapshot)
    }

    /// Reconnects until subscribed again or the budget runs out.
    ///
    /// `cause` is what broke the link; it is reported if not a single
    /// retry is allowed.
    async fn recover(&mut self, cause: ClientError) -> Result<(), ClientError> {
        self.teardown().await;
        let mut backoff = Backoff::new(&self.config);
        let mut last_error = cause;

        loop {
            let Some(delay) = backoff.next_delay() else {
                self.set_state(ConnectionState::Failed);
                tracing::warn!(
                    session_id = %self.context.session_id,
                    attempts = backoff.attempts(),
                    error = %last_error,
                    "giving up on reconnect"
                );
                return Err(ClientError::RetriesExhausted {
                    attempts: backoff.attempts(),
                    source: Box::new(last_error),
                });
            };

            self.set_state(ConnectionState::Connecting);
            tokio::time::sleep(delay).await;
            tracing::info!(
                session_id = %self.context.session_id,
                attempt = backoff.attempts(),
                "reconnecting"
            );

            match self.establish().await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() => {
                    tracing::debug!(attempt = backoff.attempts(), error = %e, "reconnect attempt failed");
                    self.teardown().await;
                    last_error = e;
                }
                Err(e) => {
                    self.teardown().await;
                    self.set_state(ConnectionState::Failed);
                    return Err(e);
                }
            }
        }
    }

    /// Stops the push pump, then closes the link. In that order, so a
    /// deliberate close is never reported as `LinkLost`.
    async fn teardown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(link) = self.link.take() {
            link.close().await;
        }
    }

    /// `CONNECTING` and `CONNECTED` only last while an operation runs.
    /// Seeing one between calls means that operation was dropped midway.
    fn interrupted(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// Turns what a dropped operation left behind into `FAILED`, so
    /// `connect()` can start over.
    fn settle(&mut self) {
        if !self.interrupted() {
            return;
        }
        tracing::warn!(
            session_id = %self.context.session_id,
            participant_id = %self.context.participant_id,
            state = %self.state,
            "connect or recovery was cancelled"
        );
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        // Dropping the link stops its tasks and the connection with them.
        self.link = None;
        self.set_state(ConnectionState::Failed);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "unexpected state change");
        }
        tracing::debug!(
            session_id = %self.context.session_id,
            participant_id = %self.context.participant_id,
            from = %self.state,
            to = %next,
            "state changed"
        );
        self.state = next;
    }
}

impl<K: Connector> Drop for ConnectionManager<K> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn submit_once<Conn: Connection>(
    link: &Link<Conn>,
    context: &SessionContext,
    config: &ClientConfig,
    nonce: &Nonce,
    from: Coord,
    to: Coord,
) -> Result<MoveEvent, ClientError> {
    let reply = link
        .request(
            |request_id| ClientMessage::SubmitMove {
                request_id,
                session_id: context.session_id.clone(),
                participant_id: context.participant_id.clone(),
                nonce: nonce.clone(),
                from,
                to,
            },
            config.request_timeout,
        )
        .await?;
    match reply {
        ServerMessage::MoveAccepted {
            event, duplicate, ..
        } => {
            if duplicate {
                tracing::debug!(%nonce, seq = event.seq, "server already had this move");
            }
            Ok(event)
        }
        other => Err(unexpected("MoveAccepted", other)),
    }
}

/// Moves pushed frames into the delivery queue until the link ends.
///
/// Pushes arrive in sequence order, so one that leaves a gap means a move
/// went missing on the way; the pump fetches everything after the cursor
/// before reading on.
async fn pump<Conn: Connection>(
    mut pushes: Pushes,
    delivery: Arc<StdMutex<Delivery>>,
    requester: Requester<Conn>,
    session_id: SessionId,
    request_timeout: Duration,
) {
    while let Some(msg) = pushes.recv().await {
        match msg {
            ServerMessage::Move { event } => {
                let gap = {
                    let mut delivery = lock(&delivery);
                    delivery.offer(event);
                    delivery.held() > 0
                };
                if gap {
                    fill_gap(&requester, &delivery, &session_id, request_timeout).await;
                }
            }
            ServerMessage::SessionUpdated { snapshot } => {
                lock(&delivery).notify(ClientEvent::SessionUpdated(snapshot));
            }
            ServerMessage::SessionClosed { session_id } => {
                lock(&delivery).notify(ClientEvent::SessionClosed(session_id));
            }
            ServerMessage::HeartbeatAck { .. } => {}
            ServerMessage::Error { kind, message, .. } => {
                tracing::warn!(?kind, %message, "server reported an error");
            }
            other => tracing::debug!(?other, "ignoring unsolicited frame"),
        }
    }
    lock(&delivery).notify(ClientEvent::LinkLost);
}

async fn fill_gap<Conn: Connection>(
    requester: &Requester<Conn>,
    delivery: &StdMutex<Delivery>,
    session_id: &SessionId,
    timeout: Duration,
) {
    let after_seq = lock(delivery).last_seq();
    let reply = requester
        .request(
            |request_id| ClientMessage::FetchMoves {
                request_id,
                session_id: session_id.clone(),
                after_seq,
            },
            timeout,
        )
        .await;
    match reply {
        Ok(ServerMessage::CatchUp { events, .. }) => {
            let delivered = lock(delivery).offer_all(events);
            tracing::debug!(%session_id, after_seq, delivered, "filled a gap in live moves");
        }
        Ok(other) => tracing::warn!(?other, "unexpected reply to a gap fetch"),
        // A dead link ends the push stream next; resume() catches up.
        Err(e) => tracing::debug!(%session_id, error = %e, "gap fetch failed"),
    }
}
