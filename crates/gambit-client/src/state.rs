use std::fmt;

/// Where a [`ConnectionManager`](crate::ConnectionManager) is in its
/// lifecycle.
///
/// ```text
/// DISCONNECTED ──connect──► CONNECTING ──► CONNECTED ──► SUBSCRIBED
///       ▲                       │              │              │
///       │                       ▼              ▼              │ link lost
///       └──────disconnect──── FAILED ◄─────────┴──────────────┤
///                               │                             ▼
///                               └───────connect──────► CONNECTING (recovery)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Dialing and handshaking.
    Connecting,
    /// Handshake done, not yet attached to the session topic.
    Connected,
    /// Receiving live moves.
    Subscribed,
    /// Gave up. Only `connect()` or `disconnect()` leave this state.
    Failed,
}

impl ConnectionState {
    /// Returns `true` if moving to `target` is a legal step.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ConnectionState::*;
        match (self, target) {
            (Disconnected | Failed, Connecting) => true,
            (Connecting, Connected | Failed) => true,
            (Connected, Subscribed | Failed) => true,
            // Retrying after a failed subscribe.
            (Connected, Connecting) => true,
            // A dropped link is recovered from scratch.
            (Subscribed, Connecting | Failed) => true,
            (Connecting | Connected | Subscribed | Failed, Disconnected) => true,
            _ => false,
        }
    }

    /// Returns `true` if moves can be submitted right now.
    pub fn is_subscribed(self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Subscribed => "SUBSCRIBED",
            Self::Failed => "FAILED",
        })
    }
}
