use std::time::Duration;

/// Client-side timeouts and the reconnect policy.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Dial plus handshake.
    pub connect_timeout: Duration,
    /// Waiting for the reply to any single request.
    pub request_timeout: Duration,
    /// Keep-alive period. Must stay well under the server's heartbeat
    /// timeout.
    pub heartbeat_interval: Duration,
    /// Reconnect attempts before the manager gives up and goes `FAILED`.
    pub retry_budget: u32,
    /// Delay before the first retry; doubles on each further one.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            retry_budget: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// Exponential backoff over a fixed attempt budget.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    attempts: u32,
    budget: u32,
    delay: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        Self {
            attempts: 0,
            budget: config.retry_budget,
            delay: config.backoff_base,
            max: config.backoff_max,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Counts an attempt and returns the delay to wait before it, or `None`
    /// once the budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.budget {
            return None;
        }
        let current = self.delay;
        self.attempts += 1;
        self.delay = (self.delay * 2).min(self.max);
        Some(current)
    }
}
