//! `GambitServer` builder and server loop.
//!
//! This is the entry point for running a Gambit server. It ties the layers
//! together: transport → protocol → session service → broadcast channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gambit_protocol::{Codec, JsonCodec};
use gambit_session::{SessionConfig, SessionService};
use gambit_transport::{Connection, Transport, TransportError, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{GambitError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) service: SessionService,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    /// Origin for `server_time` and envelope timestamps.
    pub(crate) started: Instant,
}

impl<C: Codec> ServerState<C> {
    /// Milliseconds since the server started.
    pub(crate) fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Builder for configuring and starting a Gambit server.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use gambit::prelude::*;
///
/// # async fn run() -> Result<(), GambitError> {
/// let server = GambitServer::builder()
///     .bind("0.0.0.0:8080")
///     .heartbeat_timeout(Duration::from_secs(30))
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct GambitServerBuilder {
    config: ServerConfig,
}

impl GambitServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Binds a WebSocket listener and builds a JSON-speaking server.
    pub async fn build(self) -> Result<GambitServer<WebSocketTransport, JsonCodec>, GambitError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        Ok(self.build_with(transport, JsonCodec))
    }

    /// Builds a server over any transport and codec, e.g. the in-memory
    /// transport in tests.
    pub fn build_with<T: Transport, C: Codec>(self, transport: T, codec: C) -> GambitServer<T, C> {
        let service = SessionService::new(self.config.session.clone());
        let state = Arc::new(ServerState {
            service,
            codec,
            config: self.config,
            started: Instant::now(),
        });
        GambitServer { transport, state }
    }
}

/// A Gambit server bound to a transport.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct GambitServer<T: Transport, C: Codec> {
    transport: T,
    state: Arc<ServerState<C>>,
}

impl GambitServer<WebSocketTransport, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> GambitServerBuilder {
        GambitServerBuilder::new()
    }
}

impl<C: Codec> GambitServer<WebSocketTransport, C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T: Transport, C: Codec> GambitServer<T, C> {
    /// A handle to the session service, for embedding or inspection.
    pub fn service(&self) -> SessionService {
        self.state.service.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Runs the accept loop until the transport shuts down.
    ///
    /// Each connection gets its own task. A background task sweeps idle
    /// sessions every `sweep_interval`.
    pub async fn run(mut self) -> Result<(), GambitError> {
        tracing::info!("Gambit server running");
        let reaper = tokio::spawn(sweep_idle(
            self.state.service.clone(),
            self.state.config.sweep_interval,
        ));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let conn_id = conn.id();
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(%conn_id, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(TransportError::Shutdown) => break,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        reaper.abort();
        self.transport.shutdown().await?;
        tracing::info!("Gambit server stopped");
        Ok(())
    }
}

async fn sweep_idle(service: SessionService, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let expired = service.expire_idle().await;
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "idle sweep closed sessions");
        }
    }
}
