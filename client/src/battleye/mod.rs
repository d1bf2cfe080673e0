//! BattlEye implementation of the [`rcon`](crate::rcon) capabilities
//!
//! [`Client`] is configured once per server and hands out [`Connection`]s.
//! A connection owns the UDP socket and runs two loops while open: a writer
//! that sends a keep-alive every `keep_alive_interval`, and a reader that
//! dispatches every inbound packet on its own task. Commands written to the
//! connection come back as [`Transmission`]s that complete when the reader
//! has collected every response fragment.

mod connection;
mod reader;
mod transmission;

pub use connection::Connection;
pub use transmission::Transmission;

use crate::config::ConnectionConfig;

#[derive(Debug, Clone)]
pub struct Client {
    config: ConnectionConfig,
}

impl Client {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl crate::rcon::Client for Client {
    type Connection = Connection;

    fn new_connection(&self) -> Connection {
        Connection::new(self.config.clone())
    }
}
