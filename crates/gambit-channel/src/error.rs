//! Error types for the channel layer.

use gambit_protocol::SessionId;

/// Errors that can occur during channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No topic is open for the session.
    #[error("no topic for session {0}")]
    NotFound(SessionId),

    /// The topic's actor has stopped or its command queue is closed.
    #[error("topic for session {0} is unavailable")]
    Unavailable(SessionId),
}
