//! Session lifecycle for Gambit.
//!
//! This crate owns the authoritative state of every game session:
//!
//! 1. **Registry** ([`SessionRegistry`]): session id → session state.
//! 2. **Service** ([`SessionService`]): create, join, submit moves, fetch
//!    catch-up, close and expire, publishing every change to the session's
//!    broadcast topic.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server handler (above)  ← turns wire requests into service calls
//!     ↕
//! Session layer (this crate)  ← sequence numbers, move log, idempotency
//!     ↕
//! Broadcast channel (below)  ← fans accepted moves out to subscribers
//! ```

mod error;
mod registry;
mod service;
mod session;

pub use error::SessionError;
pub use registry::SessionRegistry;
pub use service::{MoveRequest, SessionService};
pub use session::{SessionConfig, MAX_PARTICIPANTS};
