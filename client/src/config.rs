//! Connection settings

use std::fmt;
use std::time::Duration;

/// BattlEye drops sessions that stay silent for 45 seconds.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_LOGIN_READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_LOGIN_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
/// How long one steady-state read blocks before the reader loop retries.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_EVENT_QUEUE: usize = 64;

/// Everything a [`Connection`](crate::battleye::Connection) needs to reach and
/// stay logged in to a server.
///
/// The login timeouts bound only the handshake in `open`; steady-state
/// traffic is governed by `read_timeout` and `keep_alive_interval`.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// `host:port` of the RCON endpoint
    pub address: String,
    pub password: String,
    pub keep_alive_interval: Duration,
    pub login_read_timeout: Duration,
    pub login_write_timeout: Duration,
    pub read_timeout: Duration,
    /// Capacity to use for subscriber event queues.
    pub event_queue: usize,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
            login_read_timeout: DEFAULT_LOGIN_READ_TIMEOUT,
            login_write_timeout: DEFAULT_LOGIN_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            event_queue: DEFAULT_EVENT_QUEUE,
        }
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_login_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.login_read_timeout = read;
        self.login_write_timeout = write;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_event_queue(mut self, capacity: usize) -> Self {
        self.event_queue = capacity.max(1);
        self
    }
}

// Keeps the password out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("login_read_timeout", &self.login_read_timeout)
            .field("login_write_timeout", &self.login_write_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("event_queue", &self.event_queue)
            .finish()
    }
}
