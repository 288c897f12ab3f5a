//! Core data model shared by the server, the channel and the client.
//!
//! Every type here travels on the wire, so each one derives serde and the
//! tests at the bottom pin down the exact JSON shape clients rely on.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Declares a string newtype used as an identifier.
///
/// `#[serde(transparent)]` keeps the JSON a plain string (`"S1"`, not
/// `{"0":"S1"}`), and `Display` prints the raw value so ids read naturally
/// in log fields.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// `true` for the empty string, which is never a valid id.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Opaque, globally unique session identifier.
    ///
    /// Generated by the server as 128 random bits rendered as 32 lowercase
    /// hex characters.
    SessionId
}

string_id! {
    /// Caller-chosen participant identifier. Unique within one session only.
    ParticipantId
}

string_id! {
    /// Client-chosen token that makes a move submission idempotent.
    ///
    /// The pair `(ParticipantId, Nonce)` identifies a submission: sending
    /// it twice yields the same [`MoveEvent`].
    Nonce
}

/// 128 random bits as 32 lowercase hex chars.
fn random_hex() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl SessionId {
    /// Generates a fresh random session id.
    pub fn random() -> Self {
        Self(random_hex())
    }
}

impl Nonce {
    /// Generates a fresh random nonce.
    pub fn random() -> Self {
        Self(random_hex())
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Width and height of the board. Both axes run `0..BOARD_SIZE`.
pub const BOARD_SIZE: u8 = 8;

/// A square on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: u8,
    pub y: u8,
}

impl Coord {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Whether both axes fall inside the 8×8 board.
    pub fn is_on_board(self) -> bool {
        self.x < BOARD_SIZE && self.y < BOARD_SIZE
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Participants and sessions
// ---------------------------------------------------------------------------

/// Which colour a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The other colour. A joiner always gets the creator's opposite.
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => f.write_str("WHITE"),
            Self::Black => f.write_str("BLACK"),
        }
    }
}

/// Whether a participant currently holds a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connected,
}

/// One player in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub side: Side,
    pub status: ConnectionStatus,
}

impl Participant {
    /// A participant that has not connected yet.
    pub fn new(id: ParticipantId, side: Side) -> Self {
        Self {
            id,
            side,
            status: ConnectionStatus::NotConnected,
        }
    }
}

/// Lifecycle of a session.
///
/// ```text
/// OPEN ──join──► ACTIVE ──close/expire──► CLOSED
///   └─────────────close/expire──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// One participant, waiting for an opponent.
    Open,
    /// Two participants; moves are accepted.
    Active,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Active) | (Self::Open, Self::Closed) | (Self::Active, Self::Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("OPEN"),
            Self::Active => f.write_str("ACTIVE"),
            Self::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    /// In join order: creator first.
    pub participants: Vec<Participant>,
    /// Sequence number of the last accepted move (0 before any move).
    pub seq: u64,
}

impl SessionSnapshot {
    /// Looks up a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }
}

/// An accepted move. Immutable once the server assigns its `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEvent {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    /// Assigned by the server at acceptance; starts at 1 per session.
    pub seq: u64,
    pub nonce: Nonce,
    pub from: Coord,
    pub to: Coord,
}
