//! Unified error type for the Gambit server.

use gambit_channel::ChannelError;
use gambit_protocol::{ErrorKind, ProtocolError};
use gambit_session::SessionError;
use gambit_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates `From` impls, so the
/// `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GambitError {
    /// Connection, send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode, or a frame that breaks the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session operation was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The broadcast channel refused an operation.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A bounded wait ran out. The payload names what we waited for.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl GambitError {
    /// Wire category reported to the client for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Session(e) => e.kind(),
            Self::Channel(ChannelError::NotFound(_)) => ErrorKind::NotFound,
            Self::Channel(ChannelError::Unavailable(_)) | Self::Transport(_) => {
                ErrorKind::Unavailable
            }
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gambit_protocol::SessionId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let gambit_err: GambitError = err.into();
        assert!(matches!(gambit_err, GambitError::Transport(_)));
        assert!(gambit_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let gambit_err: GambitError = err.into();
        assert!(matches!(gambit_err, GambitError::Protocol(_)));
        assert_eq!(gambit_err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_from_session_error_keeps_its_kind() {
        let err = SessionError::SessionFull(SessionId::from("S1"));
        let gambit_err: GambitError = err.into();
        assert!(matches!(gambit_err, GambitError::Session(_)));
        assert_eq!(gambit_err.kind(), ErrorKind::SessionFull);
    }

    #[test]
    fn test_from_channel_error() {
        let err = ChannelError::NotFound(SessionId::from("S1"));
        let gambit_err: GambitError = err.into();
        assert_eq!(gambit_err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_timeout_message_and_kind() {
        let err = GambitError::Timeout("handshake");
        assert_eq!(err.to_string(), "timed out waiting for handshake");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
