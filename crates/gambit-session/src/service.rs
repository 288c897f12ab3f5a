//! The session service: every operation that changes a session.
//!
//! # Ordering
//!
//! Sequence assignment, the move-log append and the publish of a move all
//! happen while holding that session's mutex. The topic actor receives
//! publishes in the same order the mutex was acquired, so subscribers see
//! moves in sequence order with no gaps. Sessions don't share locks, so
//! they proceed independently.
//!
//! # Cancellation
//!
//! Every operation here may be dropped at any `.await`, e.g. by a request
//! timeout. Publishing doesn't suspend, and each operation fetches its
//! [`TopicPublisher`] before it locks the session, so there is no `.await`
//! between committing a change and announcing it.

use std::sync::Arc;

use gambit_channel::{BroadcastChannel, ChannelError, ChannelEvent, TopicPublisher};
use gambit_protocol::{
    ConnectionStatus, Coord, MoveEvent, Nonce, ParticipantId, SessionId, SessionSnapshot,
    SessionState, Side,
};

use crate::registry::SharedSession;
use crate::session::Session;
use crate::{SessionConfig, SessionError, SessionRegistry};

/// A move as submitted by a participant, before it has a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub participant_id: ParticipantId,
    pub nonce: Nonce,
    pub from: Coord,
    pub to: Coord,
}

impl MoveRequest {
    fn validate(&self) -> Result<(), SessionError> {
        if self.participant_id.is_empty() {
            return Err(SessionError::InvalidInput("participant id is empty".into()));
        }
        if self.nonce.is_empty() {
            return Err(SessionError::InvalidInput("nonce is empty".into()));
        }
        for (name, coord) in [("from", self.from), ("to", self.to)] {
            if !coord.is_on_board() {
                return Err(SessionError::InvalidInput(format!(
                    "{name} square {coord} is off the board"
                )));
            }
        }
        Ok(())
    }
}

struct Inner {
    registry: SessionRegistry,
    channel: BroadcastChannel,
    config: SessionConfig,
}

/// Shared handle to the session service. Cloning is cheap.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<Inner>,
}

impl SessionService {
    /// Creates a service with its own broadcast channel.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_channel(config, BroadcastChannel::new())
    }

    /// Creates a service publishing to an existing broadcast channel.
    pub fn with_channel(config: SessionConfig, channel: BroadcastChannel) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                channel,
                config,
            }),
        }
    }

    /// The broadcast channel sessions publish to. Subscribers attach here.
    pub fn channel(&self) -> &BroadcastChannel {
        &self.inner.channel
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Creates an OPEN session with `participant_id` on `side` and opens
    /// its broadcast topic.
    ///
    /// # Errors
    /// `InvalidInput` if `participant_id` is empty.
    pub async fn create_session(
        &self,
        participant_id: ParticipantId,
        side: Side,
    ) -> Result<SessionId, SessionError> {
        if participant_id.is_empty() {
            return Err(SessionError::InvalidInput("participant id is empty".into()));
        }

        let session_id = loop {
            let candidate = SessionId::random();
            let session = Session::new(candidate.clone(), participant_id.clone(), side);
            if self.inner.registry.insert(candidate.clone(), session).await {
                break candidate;
            }
            tracing::warn!(session_id = %candidate, "session id collision, retrying");
        };
        // Nobody knows the id before we return, so no join can beat the
        // topic. Dropped in between, the session is left without a topic
        // and the idle sweep reaps it.
        self.inner.channel.open(&session_id).await;

        tracing::info!(%session_id, %participant_id, %side, "session created");
        Ok(session_id)
    }

    /// Adds `participant_id` as the second participant and activates the
    /// session. Subscribers receive the new snapshot.
    ///
    /// # Errors
    /// - `InvalidInput` if `participant_id` is empty or already present
    /// - `NotFound` if the session doesn't exist
    /// - `SessionFull` if two participants are already in (session untouched)
    /// - `NotActive` if the session is closed
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        participant_id: ParticipantId,
    ) -> Result<SessionSnapshot, SessionError> {
        if participant_id.is_empty() {
            return Err(SessionError::InvalidInput("participant id is empty".into()));
        }
        let shared = self.lookup(session_id).await?;
        let topic = self.publisher(session_id).await;
        let mut session = shared.lock().await;

        let snapshot = session.join(participant_id.clone())?;
        publish(session_id, topic.as_ref(), ChannelEvent::Updated(snapshot.clone()));
        drop(session);

        tracing::info!(%session_id, %participant_id, "participant joined, session active");
        Ok(snapshot)
    }

    /// Accepts a move and publishes it to the session's subscribers.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty participant id or nonce, or an
    ///   off-board square
    /// - `NotFound` if the session doesn't exist
    /// - `NotActive` unless the session is ACTIVE
    /// - `UnknownParticipant` if the submitter isn't in the session
    /// - `DuplicateSubmission` carrying the earlier event if this
    ///   `(participant, nonce)` was already accepted; nothing is published
    pub async fn submit_move(
        &self,
        session_id: &SessionId,
        request: MoveRequest,
    ) -> Result<MoveEvent, SessionError> {
        request.validate()?;
        let shared = self.lookup(session_id).await?;
        let topic = self.publisher(session_id).await;
        let mut session = shared.lock().await;

        let MoveRequest {
            participant_id,
            nonce,
            from,
            to,
        } = request;
        let event = match session.accept_move(participant_id, nonce, from, to) {
            Ok(event) => event,
            Err(SessionError::DuplicateSubmission(original)) => {
                tracing::debug!(
                    %session_id,
                    participant_id = %original.participant_id,
                    nonce = %original.nonce,
                    seq = original.seq,
                    "duplicate submission"
                );
                return Err(SessionError::DuplicateSubmission(original));
            }
            Err(e) => return Err(e),
        };

        publish(session_id, topic.as_ref(), ChannelEvent::Move(event.clone()));
        drop(session);

        tracing::debug!(
            %session_id,
            participant_id = %event.participant_id,
            seq = event.seq,
            from = %event.from,
            to = %event.to,
            "move accepted"
        );
        Ok(event)
    }

    /// Current snapshot of the session.
    pub async fn session(&self, session_id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        let shared = self.lookup(session_id).await?;
        let session = shared.lock().await;
        Ok(session.snapshot())
    }

    /// Every accepted move with `seq > after_seq`, in order.
    pub async fn moves_after(
        &self,
        session_id: &SessionId,
        after_seq: u64,
    ) -> Result<Vec<MoveEvent>, SessionError> {
        let shared = self.lookup(session_id).await?;
        let session = shared.lock().await;
        Ok(session.moves_after(after_seq))
    }

    /// Records whether a participant holds a live subscription. Subscribers
    /// are told only when the status actually changes.
    pub async fn set_connection_status(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        status: ConnectionStatus,
    ) -> Result<SessionSnapshot, SessionError> {
        let shared = self.lookup(session_id).await?;
        let topic = self.publisher(session_id).await;
        let mut session = shared.lock().await;

        let changed = session.set_status(participant_id, status)?;
        let snapshot = session.snapshot();
        if changed {
            publish(session_id, topic.as_ref(), ChannelEvent::Updated(snapshot.clone()));
            tracing::debug!(%session_id, %participant_id, ?status, "connection status changed");
        }
        Ok(snapshot)
    }

    /// Closes the session: subscribers get a final `Closed` event, the
    /// topic stops and the session leaves the registry.
    ///
    /// # Errors
    /// `NotFound` if the session doesn't exist or was already closed.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        if self.close(session_id).await? {
            Ok(())
        } else {
            Err(SessionError::NotFound(session_id.clone()))
        }
    }

    /// Closes every session idle for at least the configured timeout.
    /// Returns the ids that were closed.
    pub async fn expire_idle(&self) -> Vec<SessionId> {
        let timeout = self.inner.config.idle_timeout;
        let mut idle = Vec::new();
        for session_id in self.inner.registry.ids().await {
            if let Some(shared) = self.inner.registry.get(&session_id).await {
                let session = shared.lock().await;
                // A closed session still registered is a close that was
                // interrupted; finish it.
                if session.is_idle(timeout) || session.state() == SessionState::Closed {
                    tracing::debug!(
                        %session_id,
                        state = %session.state(),
                        age_secs = session.age().as_secs(),
                        "session idle"
                    );
                    idle.push(session_id);
                }
            }
        }

        let mut expired = Vec::with_capacity(idle.len());
        for session_id in idle {
            // Someone else may have closed it in between.
            if let Ok(true) = self.close(&session_id).await {
                expired.push(session_id);
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired idle sessions");
        }
        expired
    }

    async fn lookup(&self, session_id: &SessionId) -> Result<SharedSession, SessionError> {
        self.inner
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))
    }

    /// Marks the session closed and tells its subscribers, then drops the
    /// topic and the registry entry. Each step is safe to repeat, so a
    /// close interrupted halfway is finished by the next one. Returns
    /// `false` if the session was already closed.
    async fn close(&self, session_id: &SessionId) -> Result<bool, SessionError> {
        let shared = self.lookup(session_id).await?;
        let topic = self.publisher(session_id).await;
        let mut session = shared.lock().await;

        let first = session.state() != SessionState::Closed;
        if first {
            session.close();
            publish(session_id, topic.as_ref(), ChannelEvent::Closed);
        }
        let seq = session.seq();
        drop(session);

        match self.inner.channel.close(session_id).await {
            Ok(()) | Err(ChannelError::NotFound(_)) => {}
            Err(e) => tracing::warn!(%session_id, error = %e, "failed to close topic"),
        }
        self.inner.registry.remove(session_id).await;

        if first {
            tracing::info!(%session_id, moves = seq, "session closed");
        } else {
            tracing::debug!(%session_id, "finished an interrupted close");
        }
        Ok(first)
    }

    async fn publisher(&self, session_id: &SessionId) -> Option<TopicPublisher> {
        self.inner.channel.publisher(session_id).await.ok()
    }
}

/// Publishing never fails the operation: the change is already committed
/// and subscribers recover through catch-up.
fn publish(session_id: &SessionId, topic: Option<&TopicPublisher>, event: ChannelEvent) {
    let result = match topic {
        Some(topic) => topic.publish(event),
        None => Err(ChannelError::NotFound(session_id.clone())),
    };
    if let Err(e) = result {
        tracing::warn!(%session_id, error = %e, "publish failed");
    }
}
