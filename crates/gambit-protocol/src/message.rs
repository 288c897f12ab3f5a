//! Frames exchanged between a client and the server.
//!
//! Every frame is an [`Envelope`] wrapping either a [`ClientMessage`]
//! (client → server) or a [`ServerMessage`] (server → client). Both enums
//! are internally tagged, so a submit looks like:
//!
//! ```json
//! { "seq": 4, "timestamp": 1200,
//!   "payload": { "type": "SubmitMove", "request_id": 2, "session_id": "S1",
//!                "participant_id": "alice", "nonce": "n1",
//!                "from": {"x": 6, "y": 3}, "to": {"x": 4, "y": 3} } }
//! ```
//!
//! Requests carry a client-chosen `request_id` which the matching response
//! echoes, so replies can be told apart from pushed events.

use serde::{Deserialize, Serialize};

use crate::{Coord, ErrorKind, MoveEvent, Nonce, ParticipantId, SessionId, SessionSnapshot, Side};

/// Protocol version spoken by this crate. Sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The top-level wire wrapper.
///
/// ```text
/// ┌──────────────────────────────┐
/// │ seq: 42                      │  ← per-direction frame counter
/// │ timestamp: 15000             │  ← ms since the sender started
/// │ ┌──────────────────────────┐ │
/// │ │ payload: SubmitMove {..} │ │
/// │ └──────────────────────────┘ │
/// └──────────────────────────────┘
/// ```
///
/// `seq` here numbers frames, not moves. Move ordering lives in
/// [`MoveEvent::seq`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub seq: u64,
    pub timestamp: u64,
    pub payload: M,
}

impl<M> Envelope<M> {
    pub fn new(seq: u64, timestamp: u64, payload: M) -> Self {
        Self {
            seq,
            timestamp,
            payload,
        }
    }
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    // -- Connection lifecycle --
    /// Must be the first frame on every connection.
    Handshake { version: u32 },

    /// Keep-alive. The server echoes `client_time` for RTT measurement.
    Heartbeat { client_time: u64 },

    /// "I'm leaving." The server closes after reading it.
    Disconnect { reason: String },

    // -- Lobby --
    CreateSession {
        request_id: u64,
        participant_id: ParticipantId,
        side: Side,
    },
    JoinSession {
        request_id: u64,
        session_id: SessionId,
        participant_id: ParticipantId,
    },
    GetSession {
        request_id: u64,
        session_id: SessionId,
    },
    CloseSession {
        request_id: u64,
        session_id: SessionId,
    },

    // -- Live play --
    /// Attach this connection to the session's broadcast topic.
    ///
    /// The reply carries every move with `seq > after_seq` as backlog, so
    /// a reconnecting client catches up in the same round trip.
    Subscribe {
        request_id: u64,
        session_id: SessionId,
        participant_id: ParticipantId,
        after_seq: u64,
    },
    Unsubscribe { request_id: u64 },
    FetchMoves {
        request_id: u64,
        session_id: SessionId,
        after_seq: u64,
    },
    SubmitMove {
        request_id: u64,
        session_id: SessionId,
        participant_id: ParticipantId,
        nonce: Nonce,
        from: Coord,
        to: Coord,
    },
}

impl ClientMessage {
    /// The client-chosen id of a request, or `None` for lifecycle frames.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::CreateSession { request_id, .. }
            | Self::JoinSession { request_id, .. }
            | Self::GetSession { request_id, .. }
            | Self::CloseSession { request_id, .. }
            | Self::Subscribe { request_id, .. }
            | Self::Unsubscribe { request_id }
            | Self::FetchMoves { request_id, .. }
            | Self::SubmitMove { request_id, .. } => Some(*request_id),
            Self::Handshake { .. } | Self::Heartbeat { .. } | Self::Disconnect { .. } => None,
        }
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    // -- Connection lifecycle --
    HandshakeAck { server_time: u64 },
    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Replies --
    SessionCreated {
        request_id: u64,
        session_id: SessionId,
    },
    SessionJoined {
        request_id: u64,
        snapshot: SessionSnapshot,
    },
    SessionInfo {
        request_id: u64,
        snapshot: SessionSnapshot,
    },
    Subscribed {
        request_id: u64,
        snapshot: SessionSnapshot,
        backlog: Vec<MoveEvent>,
    },
    Unsubscribed { request_id: u64 },
    CatchUp {
        request_id: u64,
        events: Vec<MoveEvent>,
    },
    /// `duplicate` is `true` when the `(participant, nonce)` pair had
    /// already been accepted; `event` is then the original acceptance.
    MoveAccepted {
        request_id: u64,
        event: MoveEvent,
        duplicate: bool,
    },
    Closed {
        request_id: u64,
        session_id: SessionId,
    },

    // -- Pushed by the session topic --
    Move { event: MoveEvent },
    SessionUpdated { snapshot: SessionSnapshot },
    SessionClosed { session_id: SessionId },

    /// `request_id` is `None` when the failure isn't tied to a request
    /// (bad handshake, undecodable frame).
    Error {
        request_id: Option<u64>,
        kind: ErrorKind,
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    /// Builds an `Error` frame with the code derived from `kind`.
    pub fn error(request_id: Option<u64>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            request_id,
            kind,
            code: kind.code(),
            message: message.into(),
        }
    }

    /// The request this frame answers, or `None` for pushed frames.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::SessionCreated { request_id, .. }
            | Self::SessionJoined { request_id, .. }
            | Self::SessionInfo { request_id, .. }
            | Self::Subscribed { request_id, .. }
            | Self::Unsubscribed { request_id }
            | Self::CatchUp { request_id, .. }
            | Self::MoveAccepted { request_id, .. }
            | Self::Closed { request_id, .. } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
            Self::HandshakeAck { .. }
            | Self::HeartbeatAck { .. }
            | Self::Move { .. }
            | Self::SessionUpdated { .. }
            | Self::SessionClosed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Participant, SessionState};

    fn sample_event() -> MoveEvent {
        MoveEvent {
            session_id: SessionId::from("S1"),
            participant_id: ParticipantId::from("alice"),
            seq: 1,
            nonce: Nonce::from("n1"),
            from: Coord::new(6, 3),
            to: Coord::new(4, 3),
        }
    }

    #[test]
    fn test_handshake_json_format() {
        let msg = ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "Handshake", "version": 1 }));
    }

    #[test]
    fn test_submit_move_json_format() {
        let msg = ClientMessage::SubmitMove {
            request_id: 2,
            session_id: SessionId::from("S1"),
            participant_id: ParticipantId::from("alice"),
            nonce: Nonce::from("n1"),
            from: Coord::new(6, 3),
            to: Coord::new(4, 3),
        };
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "SubmitMove");
        assert_eq!(json["session_id"], "S1");
        assert_eq!(json["participant_id"], "alice");
        assert_eq!(json["nonce"], "n1");
        assert_eq!(json["from"]["x"], 6);
        assert_eq!(json["to"]["y"], 3);
    }

    #[test]
    fn test_create_session_side_is_uppercase_on_wire() {
        let msg = ClientMessage::CreateSession {
            request_id: 1,
            participant_id: ParticipantId::from("alice"),
            side: Side::White,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["side"], "WHITE");
    }

    #[test]
    fn test_subscribed_carries_snapshot_and_backlog() {
        let msg = ServerMessage::Subscribed {
            request_id: 4,
            snapshot: SessionSnapshot {
                session_id: SessionId::from("S1"),
                state: SessionState::Active,
                participants: vec![Participant::new(ParticipantId::from("alice"), Side::White)],
                seq: 1,
            },
            backlog: vec![sample_event()],
        };
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Subscribed");
        assert_eq!(json["snapshot"]["seq"], 1);
        assert_eq!(json["backlog"][0]["seq"], 1);

        let back: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_error_helper_fills_code_from_kind() {
        let msg = ServerMessage::error(Some(9), ErrorKind::SessionFull, "session is full");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Error");
        assert_eq!(json["request_id"], 9);
        assert_eq!(json["kind"], "SESSION_FULL");
        assert_eq!(json["code"], 409);
    }

    #[test]
    fn test_request_id_present_on_replies_only() {
        let accepted = ServerMessage::MoveAccepted {
            request_id: 3,
            event: sample_event(),
            duplicate: false,
        };
        assert_eq!(accepted.request_id(), Some(3));

        let pushed = ServerMessage::Move {
            event: sample_event(),
        };
        assert_eq!(pushed.request_id(), None);

        let unbound = ServerMessage::error(None, ErrorKind::Protocol, "bad frame");
        assert_eq!(unbound.request_id(), None);
    }

    #[test]
    fn test_client_request_id_absent_on_lifecycle_frames() {
        assert_eq!(ClientMessage::Heartbeat { client_time: 1 }.request_id(), None);
        assert_eq!(
            ClientMessage::FetchMoves {
                request_id: 8,
                session_id: SessionId::from("S1"),
                after_seq: 0,
            }
            .request_id(),
            Some(8)
        );
    }

    #[test]
    fn test_envelope_json_shape() {
        let env = Envelope::new(3, 100, ClientMessage::Unsubscribe { request_id: 5 });
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["timestamp"], 100);
        assert_eq!(json["payload"]["type"], "Unsubscribe");
    }

    #[test]
    fn test_decode_unknown_message_type_returns_error() {
        let unknown = r#"{"type": "FlyToMoon", "speed": 9000}"#;
        assert!(serde_json::from_str::<ClientMessage>(unknown).is_err());
    }

    #[test]
    fn test_decode_envelope_missing_payload_returns_error() {
        let wrong = r#"{"seq": 1, "timestamp": 5}"#;
        assert!(serde_json::from_str::<Envelope<ClientMessage>>(wrong).is_err());
    }
}
