use std::time::Duration;

use gambit_session::SessionConfig;

/// Server-wide settings. Build one through
/// [`GambitServerBuilder`](crate::GambitServerBuilder) or start from
/// `ServerConfig::default()` and override fields.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address for the WebSocket transport.
    pub bind_addr: String,
    /// How long a new connection has to send its `Handshake`.
    pub handshake_timeout: Duration,
    /// Upper bound on serving a single request.
    pub request_timeout: Duration,
    /// A connection silent for this long is closed.
    pub heartbeat_timeout: Duration,
    /// How often idle sessions are swept.
    pub sweep_interval: Duration,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(30),
            session: SessionConfig::default(),
        }
    }
}
