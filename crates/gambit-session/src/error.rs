//! Error types for the session layer.

use gambit_channel::ChannelError;
use gambit_protocol::{ErrorKind, MoveEvent, ParticipantId, SessionId};

/// Errors returned by the [`SessionService`](crate::SessionService).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Empty ids or nonces, off-board coordinates, a participant id that
    /// is already taken in the session.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No session with that id (never existed, closed, or expired).
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session already has two participants.
    #[error("session {0} is full")]
    SessionFull(SessionId),

    /// The session does not accept this operation in its current state.
    #[error("session {session} is {state}, not active")]
    NotActive {
        session: SessionId,
        state: gambit_protocol::SessionState,
    },

    /// The participant is not part of the session.
    #[error("participant {participant} is not in session {session}")]
    UnknownParticipant {
        participant: ParticipantId,
        session: SessionId,
    },

    /// The `(participant, nonce)` pair was accepted before. Carries the
    /// original event so callers can treat the retry as a success.
    #[error("move with nonce {} already accepted as seq {}", .0.nonce, .0.seq)]
    DuplicateSubmission(Box<MoveEvent>),

    /// The broadcast channel refused an operation.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl SessionError {
    /// Wire category for this error.
    ///
    /// `DuplicateSubmission` is not a failure on the wire (the server
    /// answers with the original event), so it maps to `InvalidInput` only
    /// for completeness.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::DuplicateSubmission(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SessionFull(_) => ErrorKind::SessionFull,
            Self::NotActive { .. } => ErrorKind::NotActive,
            Self::UnknownParticipant { .. } => ErrorKind::UnknownParticipant,
            Self::Channel(ChannelError::NotFound(_)) => ErrorKind::NotFound,
            Self::Channel(ChannelError::Unavailable(_)) => ErrorKind::Unavailable,
        }
    }
}
