//! Game-agnostic RCON capabilities and the [`Rcon`] façade built on them
//!
//! A game-specific implementation provides a [`Client`] that hands out
//! [`Connection`]s, and a [`Transmission`] type for its commands. [`Rcon`]
//! only ever talks to those traits, so it works unchanged for any game.

use crate::error::ClientError;
use crate::subscription::SubscriptionId;
use log::{info, warn};
use protocol::{Event, Sequence};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// One command and its eventual response.
#[allow(async_fn_in_trait)]
pub trait Transmission {
    fn key(&self) -> Sequence;
    fn request(&self) -> &str;
    /// Resolves once the response is complete.
    async fn done(&self);
    fn response(&self) -> Option<String>;
}

#[allow(async_fn_in_trait)]
pub trait Connection {
    type Transmission: Transmission;

    async fn open(&mut self) -> Result<(), ClientError>;
    async fn close(&mut self) -> Result<(), ClientError>;
    async fn write(&self, cmd: &str) -> Result<Self::Transmission, ClientError>;
    /// Delivers server events to `out` until `token` is cancelled.
    async fn subscribe(&self, token: CancellationToken, out: mpsc::Sender<Event>)
        -> SubscriptionId;
}

/// Factory for connections, configured once per server.
pub trait Client {
    type Connection: Connection;

    fn new_connection(&self) -> Self::Connection;
}

/// Holds at most one connection and serializes every operation on it.
pub struct Rcon<C: Client> {
    client: C,
    connection: Mutex<Option<C::Connection>>,
}

impl<C: Client> Rcon<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Opens a fresh connection. Nothing is stored if opening fails.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut current = self.connection.lock().await;
        if current.is_some() {
            return Err(ClientError::ConnectionPresent);
        }

        let mut connection = self.client.new_connection();
        connection.open().await?;
        *current = Some(connection);
        info!("RCON connection established");
        Ok(())
    }

    pub async fn write(
        &self,
        cmd: &str,
    ) -> Result<<C::Connection as Connection>::Transmission, ClientError> {
        let current = self.connection.lock().await;
        let connection = current.as_ref().ok_or(ClientError::NoConnection)?;
        connection.write(cmd).await
    }

    /// Replaces the current connection with a new one. A failure to close the
    /// old connection is logged and otherwise ignored.
    ///
    /// Subscriptions belong to the old connection and end with it; their
    /// channels close and callers subscribe again.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let mut current = self.connection.lock().await;

        if let Some(mut old) = current.take() {
            if let Err(e) = old.close().await {
                warn!("Ignoring failed close during reconnect: {}", e);
            }
        }

        let mut connection = self.client.new_connection();
        connection.open().await?;
        *current = Some(connection);
        info!("RCON connection re-established");
        Ok(())
    }

    /// Closes and drops the current connection. If closing fails the
    /// connection is kept so the caller can retry.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let mut current = self.connection.lock().await;
        let mut connection = current.take().ok_or(ClientError::NoConnection)?;

        if let Err(e) = connection.close().await {
            *current = Some(connection);
            return Err(e);
        }
        info!("RCON connection closed");
        Ok(())
    }

    pub async fn subscribe(
        &self,
        token: CancellationToken,
        out: mpsc::Sender<Event>,
    ) -> Result<SubscriptionId, ClientError> {
        let current = self.connection.lock().await;
        let connection = current.as_ref().ok_or(ClientError::NoConnection)?;
        Ok(connection.subscribe(token, out).await)
    }
}
