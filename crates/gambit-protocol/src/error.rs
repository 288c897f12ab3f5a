//! Error types for the protocol layer.
//!
//! Two kinds of "error" live here. [`ProtocolError`] is a local failure to
//! encode or decode a frame. [`ErrorKind`] is the category a server puts in
//! an `Error` frame so the client can map it back to a typed error.

use serde::{Deserialize, Serialize};

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed. Common causes: malformed JSON, missing
    /// fields, an unknown `"type"` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded fine but breaks a protocol rule, e.g. a request
    /// arriving before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The peer speaks a protocol version we don't.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

/// Category of a server-side failure, carried in `ServerMessage::Error`.
///
/// `#[serde(rename_all = "SCREAMING_SNAKE_CASE")]` gives `"SESSION_FULL"`
/// on the wire, which reads well next to the HTTP-style `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Empty id, empty nonce, off-board coordinate, duplicate participant.
    InvalidInput,
    /// No session with that id.
    NotFound,
    /// The session already has two participants.
    SessionFull,
    /// The session is not accepting moves (still open, or closed).
    NotActive,
    /// The participant is not part of the session.
    UnknownParticipant,
    /// The server gave up waiting.
    Timeout,
    /// The frame broke a protocol rule.
    Protocol,
    /// The server could not reach an internal component.
    Unavailable,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput | Self::Protocol => 400,
            Self::UnknownParticipant => 403,
            Self::NotFound => 404,
            Self::Timeout => 408,
            Self::SessionFull | Self::NotActive => 409,
            Self::Unavailable => 503,
        }
    }
}
