use std::fmt;

use gambit_protocol::{MoveEvent, ParticipantId, SessionSnapshot};

/// Identifies one endpoint on a topic.
///
/// The server subscribes each connection under its participant id, so a
/// participant that reconnects replaces its own stale endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ParticipantId> for SubscriberId {
    fn from(id: &ParticipantId) -> Self {
        Self(id.as_str().to_owned())
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// What a topic carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A newly accepted move.
    Move(MoveEvent),
    /// Participants or state changed (someone joined, someone connected).
    Updated(SessionSnapshot),
    /// The session is gone. The stream ends right after this event.
    Closed,
}
