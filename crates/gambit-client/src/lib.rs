//! # Gambit client
//!
//! Everything a player's process needs to take part in a Gambit session:
//!
//! - [`Lobby`] creates and joins sessions with one-shot requests.
//! - [`ConnectionManager`] keeps one participant subscribed to one session,
//!   delivers moves to an [`Inbox`] in order and exactly once, and rides
//!   out dropped connections.
//!
//! Both are generic over [`Connector`](gambit_transport::Connector), so
//! the same code runs over WebSocket or the in-memory transport.

mod config;
mod context;
mod delivery;
mod error;
mod link;
mod lobby;
mod manager;
mod state;

pub use config::ClientConfig;
pub use context::SessionContext;
pub use delivery::{ClientEvent, Inbox};
pub use error::ClientError;
pub use lobby::Lobby;
pub use manager::ConnectionManager;
pub use state::ConnectionState;
