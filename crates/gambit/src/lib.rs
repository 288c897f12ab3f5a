//! # Gambit
//!
//! Session coordination and move relay for two-player, turn-based games.
//!
//! One player creates a session, a second joins it by id, and both then
//! exchange moves through a per-session broadcast topic. The server
//! guarantees every accepted move reaches every subscriber exactly once and
//! in sequence order; it does not know the rules of the game.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gambit::prelude::*;
//!
//! # async fn run() -> Result<(), GambitError> {
//! let server = GambitServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::GambitError;
pub use server::{GambitServer, GambitServerBuilder};

pub use gambit_channel as channel;
pub use gambit_protocol as protocol;
pub use gambit_session as session;
pub use gambit_transport as transport;

/// The types most servers need.
pub mod prelude {
    pub use crate::{GambitError, GambitServer, GambitServerBuilder, ServerConfig};
    pub use gambit_protocol::{
        Coord, MoveEvent, Nonce, ParticipantId, SessionId, SessionSnapshot, SessionState, Side,
    };
    pub use gambit_session::{MoveRequest, SessionConfig, SessionError, SessionService};
}
