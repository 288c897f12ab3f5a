use gambit_protocol::{ClientMessage, ParticipantId, ServerMessage, SessionId, SessionSnapshot, Side};
use gambit_transport::Connector;

use crate::link::{unexpected, Link};
use crate::{ClientConfig, ClientError};

/// Create, join and inspect sessions.
///
/// Each call opens a short-lived connection, sends one request and closes
/// again. Live play goes through a
/// [`ConnectionManager`](crate::ConnectionManager) instead.
pub struct Lobby<K: Connector> {
    connector: K,
    config: ClientConfig,
}

impl<K: Connector> Lobby<K> {
    pub fn new(connector: K) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    pub fn with_config(connector: K, config: ClientConfig) -> Self {
        Self { connector, config }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Creates a session with `participant_id` playing `side`.
    ///
    /// # Errors
    /// `InvalidInput` if `participant_id` is empty.
    pub async fn create_session(
        &self,
        participant_id: impl Into<ParticipantId>,
        side: Side,
    ) -> Result<SessionId, ClientError> {
        let participant_id = participant_id.into();
        match self
            .call(|request_id| ClientMessage::CreateSession {
                request_id,
                participant_id: participant_id.clone(),
                side,
            })
            .await?
        {
            ServerMessage::SessionCreated { session_id, .. } => {
                tracing::info!(%session_id, %participant_id, %side, "created session");
                Ok(session_id)
            }
            other => Err(unexpected("SessionCreated", other)),
        }
    }

    /// Joins an open session as its second participant.
    ///
    /// # Errors
    /// `NotFound`, `SessionFull`, `NotActive` (closed), or `InvalidInput`
    /// for an empty or already-present participant id.
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        participant_id: impl Into<ParticipantId>,
    ) -> Result<SessionSnapshot, ClientError> {
        let participant_id = participant_id.into();
        match self
            .call(|request_id| ClientMessage::JoinSession {
                request_id,
                session_id: session_id.clone(),
                participant_id: participant_id.clone(),
            })
            .await?
        {
            ServerMessage::SessionJoined { snapshot, .. } => {
                tracing::info!(%session_id, %participant_id, "joined session");
                Ok(snapshot)
            }
            other => Err(unexpected("SessionJoined", other)),
        }
    }

    /// Current snapshot of a session.
    pub async fn session(&self, session_id: &SessionId) -> Result<SessionSnapshot, ClientError> {
        match self
            .call(|request_id| ClientMessage::GetSession {
                request_id,
                session_id: session_id.clone(),
            })
            .await?
        {
            ServerMessage::SessionInfo { snapshot, .. } => Ok(snapshot),
            other => Err(unexpected("SessionInfo", other)),
        }
    }

    /// Ends a session for everyone in it.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<(), ClientError> {
        match self
            .call(|request_id| ClientMessage::CloseSession {
                request_id,
                session_id: session_id.clone(),
            })
            .await?
        {
            ServerMessage::Closed { .. } => Ok(()),
            other => Err(unexpected("Closed", other)),
        }
    }

    async fn call(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> Result<ServerMessage, ClientError> {
        let (link, _pushes) = Link::open(&self.connector, &self.config).await?;
        let reply = link.request(build, self.config.request_timeout).await;
        link.close().await;
        reply
    }
}
