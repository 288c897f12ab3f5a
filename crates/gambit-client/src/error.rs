use gambit_protocol::{ErrorKind, ProtocolError};
use gambit_transport::TransportError;

use crate::ConnectionState;

/// Errors surfaced by the lobby and the connection manager.
///
/// The first five variants mirror the server's refusals one to one, so a
/// caller can match on them without looking at wire codes.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session full: {0}")]
    SessionFull(String),

    #[error("session not active: {0}")]
    NotActive(String),

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// Any other refusal the server reported.
    #[error("server error ({kind:?}): {message}")]
    Remote { kind: ErrorKind, message: String },

    /// A bounded wait ran out. The payload names what we waited for.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The operation isn't allowed in the manager's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// Recovery gave up; the manager is now `FAILED`.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Maps an `Error` frame back to a typed error.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidInput => Self::InvalidInput(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::SessionFull => Self::SessionFull(message),
            ErrorKind::NotActive => Self::NotActive(message),
            ErrorKind::UnknownParticipant => Self::UnknownParticipant(message),
            ErrorKind::Timeout => Self::Timeout("server"),
            ErrorKind::Protocol | ErrorKind::Unavailable => Self::Remote { kind, message },
        }
    }

    /// `true` if reconnecting and retrying could succeed.
    ///
    /// Refusals are final: the server answered and said no.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout(_)
                | Self::Remote {
                    kind: ErrorKind::Unavailable,
                    ..
                }
        )
    }
}
