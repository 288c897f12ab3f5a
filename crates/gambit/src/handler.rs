//! Per-connection handler: handshake, request routing and live fan-out.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Handshake` → validate version → send `HandshakeAck`
//!   2. Loop, waiting on whichever comes first:
//!      - a frame from the client → answer it
//!      - an event from the session topic we're subscribed to → push it
//!      - the heartbeat deadline → close
//!   3. Drop the subscription and mark the participant disconnected

use std::ops::ControlFlow;
use std::sync::Arc;

use gambit_channel::{ChannelEvent, SubscriptionHandle};
use gambit_protocol::{
    ClientMessage, Codec, ConnectionStatus, Envelope, ErrorKind, ParticipantId, ProtocolError,
    ServerMessage, SessionId, PROTOCOL_VERSION,
};
use gambit_session::{MoveRequest, SessionError};
use gambit_transport::Connection;
use tokio::time::Instant;

use crate::server::ServerState;
use crate::GambitError;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<Conn, C>(
    conn: Conn,
    state: Arc<ServerState<C>>,
) -> Result<(), GambitError>
where
    Conn: Connection,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let mut handler = Handler {
        conn: &conn,
        state: &state,
        out_seq: 1,
        subscription: None,
    };

    if let Err(e) = handler.handshake().await {
        tracing::debug!(%conn_id, error = %e, "handshake failed");
        let _ = conn.close().await;
        return Err(e);
    }
    tracing::info!(%conn_id, "client connected");

    let result = handler.serve().await;
    handler.release_subscription().await;
    let _ = conn.close().await;
    tracing::info!(%conn_id, "client disconnected");
    result
}

/// The topic this connection is attached to, and as whom.
struct Subscription {
    handle: SubscriptionHandle,
    session_id: SessionId,
    participant_id: ParticipantId,
}

/// What woke the serve loop.
enum Wake {
    Frame(Result<Option<Vec<u8>>, gambit_transport::TransportError>),
    Event(Option<ChannelEvent>),
    Silent,
}

struct Handler<'a, Conn, C: Codec> {
    conn: &'a Conn,
    state: &'a ServerState<C>,
    out_seq: u64,
    subscription: Option<Subscription>,
}

impl<Conn: Connection, C: Codec> Handler<'_, Conn, C> {
    async fn send(&mut self, msg: ServerMessage) -> Result<(), GambitError> {
        let envelope = Envelope::new(self.out_seq, self.state.now_ms(), msg);
        self.out_seq += 1;
        let bytes = self.state.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), GambitError> {
        let data = match tokio::time::timeout(
            self.state.config.handshake_timeout,
            self.conn.recv(),
        )
        .await
        {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                return Err(ProtocolError::InvalidMessage(
                    "connection closed before handshake".into(),
                )
                .into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(GambitError::Timeout("handshake")),
        };

        let version = match self.state.codec.decode::<Envelope<ClientMessage>>(&data) {
            Ok(Envelope {
                payload: ClientMessage::Handshake { version },
                ..
            }) => version,
            _ => {
                self.send(ServerMessage::error(
                    None,
                    ErrorKind::Protocol,
                    "expected Handshake",
                ))
                .await?;
                return Err(ProtocolError::InvalidMessage(
                    "first message must be Handshake".into(),
                )
                .into());
            }
        };

        if version != PROTOCOL_VERSION {
            self.send(ServerMessage::error(
                None,
                ErrorKind::Protocol,
                format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
            ))
            .await?;
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            }
            .into());
        }

        let server_time = self.state.now_ms();
        self.send(ServerMessage::HandshakeAck { server_time }).await
    }

    async fn serve(&mut self) -> Result<(), GambitError> {
        let conn = self.conn;
        let heartbeat = self.state.config.heartbeat_timeout;
        let mut deadline = Instant::now() + heartbeat;

        loop {
            let wake = tokio::select! {
                frame = conn.recv() => Wake::Frame(frame),
                event = next_event(&mut self.subscription) => Wake::Event(event),
                _ = tokio::time::sleep_until(deadline) => Wake::Silent,
            };

            match wake {
                Wake::Frame(Ok(Some(data))) => {
                    deadline = Instant::now() + heartbeat;
                    if self.handle_frame(&data).await?.is_break() {
                        return Ok(());
                    }
                }
                Wake::Frame(Ok(None)) => {
                    tracing::debug!(conn_id = %conn.id(), "connection closed cleanly");
                    return Ok(());
                }
                Wake::Frame(Err(e)) => return Err(e.into()),
                Wake::Event(event) => self.forward(event).await?,
                Wake::Silent => {
                    tracing::info!(conn_id = %conn.id(), "connection timed out");
                    return Err(GambitError::Timeout("heartbeat"));
                }
            }
        }
    }

    /// Pushes a topic event to the client.
    async fn forward(&mut self, event: Option<ChannelEvent>) -> Result<(), GambitError> {
        match event {
            Some(ChannelEvent::Move(event)) => self.send(ServerMessage::Move { event }).await,
            Some(ChannelEvent::Updated(snapshot)) => {
                self.send(ServerMessage::SessionUpdated { snapshot }).await
            }
            Some(ChannelEvent::Closed) => {
                // The session is gone; there is nothing left to unsubscribe.
                match self.subscription.take() {
                    Some(sub) => {
                        self.send(ServerMessage::SessionClosed {
                            session_id: sub.session_id,
                        })
                        .await
                    }
                    None => Ok(()),
                }
            }
            None => {
                // Replaced by a newer subscription for the same participant.
                if let Some(sub) = self.subscription.take() {
                    tracing::debug!(
                        session_id = %sub.session_id,
                        participant_id = %sub.participant_id,
                        "subscription superseded"
                    );
                }
                Ok(())
            }
        }
    }

    async fn handle_frame(&mut self, data: &[u8]) -> Result<ControlFlow<()>, GambitError> {
        let envelope: Envelope<ClientMessage> = match self.state.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(conn_id = %self.conn.id(), error = %e, "failed to decode envelope");
                self.send(ServerMessage::error(None, ErrorKind::Protocol, e.to_string()))
                    .await?;
                return Ok(ControlFlow::Continue(()));
            }
        };

        match envelope.payload {
            ClientMessage::Heartbeat { client_time } => {
                let server_time = self.state.now_ms();
                self.send(ServerMessage::HeartbeatAck {
                    client_time,
                    server_time,
                })
                .await?;
            }
            ClientMessage::Handshake { .. } => {
                self.send(ServerMessage::error(
                    None,
                    ErrorKind::Protocol,
                    "already handshaken",
                ))
                .await?;
            }
            ClientMessage::Disconnect { reason } => {
                tracing::info!(conn_id = %self.conn.id(), %reason, "client said goodbye");
                return Ok(ControlFlow::Break(()));
            }
            request => {
                let request_id = request.request_id();
                let timeout = self.state.config.request_timeout;
                let reply = match tokio::time::timeout(timeout, self.handle_request(request)).await
                {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => ServerMessage::error(request_id, e.kind(), e.to_string()),
                    Err(_) => {
                        tracing::warn!(conn_id = %self.conn.id(), ?request_id, "request timed out");
                        ServerMessage::error(request_id, ErrorKind::Timeout, "request timed out")
                    }
                };
                self.send(reply).await?;
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Serves one request and returns the reply to send.
    async fn handle_request(&mut self, request: ClientMessage) -> Result<ServerMessage, GambitError> {
        let state = self.state;
        let service = &state.service;
        let reply = match request {
            ClientMessage::CreateSession {
                request_id,
                participant_id,
                side,
            } => {
                let session_id = service.create_session(participant_id, side).await?;
                ServerMessage::SessionCreated {
                    request_id,
                    session_id,
                }
            }
            ClientMessage::JoinSession {
                request_id,
                session_id,
                participant_id,
            } => {
                let snapshot = service.join_session(&session_id, participant_id).await?;
                ServerMessage::SessionJoined {
                    request_id,
                    snapshot,
                }
            }
            ClientMessage::GetSession {
                request_id,
                session_id,
            } => ServerMessage::SessionInfo {
                request_id,
                snapshot: service.session(&session_id).await?,
            },
            ClientMessage::CloseSession {
                request_id,
                session_id,
            } => {
                service.close_session(&session_id).await?;
                ServerMessage::Closed {
                    request_id,
                    session_id,
                }
            }
            ClientMessage::Subscribe {
                request_id,
                session_id,
                participant_id,
                after_seq,
            } => self.subscribe(request_id, session_id, participant_id, after_seq).await?,
            ClientMessage::Unsubscribe { request_id } => {
                self.release_subscription().await;
                ServerMessage::Unsubscribed { request_id }
            }
            ClientMessage::FetchMoves {
                request_id,
                session_id,
                after_seq,
            } => ServerMessage::CatchUp {
                request_id,
                events: service.moves_after(&session_id, after_seq).await?,
            },
            ClientMessage::SubmitMove {
                request_id,
                session_id,
                participant_id,
                nonce,
                from,
                to,
            } => {
                let request = MoveRequest {
                    participant_id,
                    nonce,
                    from,
                    to,
                };
                match service.submit_move(&session_id, request).await {
                    Ok(event) => ServerMessage::MoveAccepted {
                        request_id,
                        event,
                        duplicate: false,
                    },
                    Err(SessionError::DuplicateSubmission(event)) => ServerMessage::MoveAccepted {
                        request_id,
                        event: *event,
                        duplicate: true,
                    },
                    Err(e) => return Err(e.into()),
                }
            }
            ClientMessage::Handshake { .. }
            | ClientMessage::Heartbeat { .. }
            | ClientMessage::Disconnect { .. } => {
                return Err(ProtocolError::InvalidMessage("not a request".into()).into());
            }
        };
        Ok(reply)
    }

    /// Attaches this connection to a session topic.
    ///
    /// The topic subscription is taken before reading the backlog, so any
    /// move accepted in between shows up in the backlog, live, or both.
    /// Never in neither; the client drops the duplicates by sequence.
    async fn subscribe(
        &mut self,
        request_id: u64,
        session_id: SessionId,
        participant_id: ParticipantId,
        after_seq: u64,
    ) -> Result<ServerMessage, GambitError> {
        let state = self.state;
        let service = &state.service;

        let snapshot = service.session(&session_id).await?;
        if snapshot.participant(&participant_id).is_none() {
            return Err(SessionError::UnknownParticipant {
                participant: participant_id,
                session: session_id,
            }
            .into());
        }

        self.release_subscription().await;

        let handle = service
            .channel()
            .subscribe(&session_id, &participant_id)
            .await?;
        let snapshot = service
            .set_connection_status(&session_id, &participant_id, ConnectionStatus::Connected)
            .await?;
        let backlog = service.moves_after(&session_id, after_seq).await?;

        tracing::info!(
            %session_id,
            %participant_id,
            after_seq,
            backlog = backlog.len(),
            "subscribed"
        );
        self.subscription = Some(Subscription {
            handle,
            session_id,
            participant_id,
        });
        Ok(ServerMessage::Subscribed {
            request_id,
            snapshot,
            backlog,
        })
    }

    /// Detaches from the current topic, if any, and marks the participant
    /// as no longer connected.
    async fn release_subscription(&mut self) {
        let Some(sub) = self.subscription.take() else {
            return;
        };
        let service = &self.state.service;
        service.channel().unsubscribe(&sub.handle).await;
        if let Err(e) = service
            .set_connection_status(
                &sub.session_id,
                &sub.participant_id,
                ConnectionStatus::NotConnected,
            )
            .await
        {
            tracing::debug!(session_id = %sub.session_id, error = %e, "status update skipped");
        }
        tracing::debug!(
            session_id = %sub.session_id,
            participant_id = %sub.participant_id,
            "unsubscribed"
        );
    }
}

/// Next event from the current subscription; pends forever without one.
async fn next_event(subscription: &mut Option<Subscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(sub) => sub.handle.recv().await,
        None => std::future::pending().await,
    }
}
