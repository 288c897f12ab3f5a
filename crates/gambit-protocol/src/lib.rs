//! Wire protocol for Gambit.
//!
//! This crate defines what clients and servers say to each other:
//!
//! - **Types** ([`SessionId`], [`MoveEvent`], [`SessionSnapshot`], ...):
//!   the data model shared by every other crate.
//! - **Messages** ([`Envelope`], [`ClientMessage`], [`ServerMessage`]):
//!   the frames that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`], [`ErrorKind`]).
//!
//! The protocol layer knows nothing about connections or sessions being
//! alive; it only describes and serializes them.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session service
//! ```

mod codec;
mod error;
mod message;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::{ErrorKind, ProtocolError};
pub use message::{ClientMessage, Envelope, ServerMessage, PROTOCOL_VERSION};
pub use types::{
    ConnectionStatus, Coord, MoveEvent, Nonce, Participant, ParticipantId, SessionId,
    SessionSnapshot, SessionState, Side, BOARD_SIZE,
};
