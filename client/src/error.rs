//! Error types for connections, transmissions and the broker

use protocol::PacketError;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    // Usage errors
    #[error("connection is already open")]
    AlreadyOpen,
    #[error("connection is not open")]
    NotOpen,
    #[error("session loops have stopped; close and reopen the connection")]
    SessionEnded,
    #[error("no connection present")]
    NoConnection,
    #[error("connection already present")]
    ConnectionPresent,

    // Transport errors
    #[error("failed to dial server: {0}")]
    Dial(#[source] io::Error),
    #[error("failed to send login packet: {0}")]
    LoginSendFailed(#[source] io::Error),
    #[error("failed to read login response: {0}")]
    LoginReadFailed(#[source] io::Error),
    #[error("no login response within {0:?}")]
    LoginTimeout(Duration),
    #[error("failed to send packet: {0}")]
    SendFailed(#[source] io::Error),
    #[error("failed to receive packet: {0}")]
    Receive(#[source] io::Error),
    #[error("failed to close connection: {0}")]
    CloseFailed(String),

    // Protocol errors
    #[error("login verification failed: {0}")]
    LoginVerifyFailed(#[source] PacketError),
    #[error("no transmission for sequence {0}")]
    UnknownTransmission(u8),
    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
}

impl ClientError {
    /// True when the server explicitly refused the credentials, as opposed to
    /// answering with something unreadable.
    pub fn is_login_rejected(&self) -> bool {
        matches!(
            self,
            ClientError::LoginVerifyFailed(PacketError::LoginRejected)
        )
    }
}

/// Why a [`Broker`](crate::broker::Broker) stopped, or why it could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker context cancelled")]
    ContextCancelled,
    #[error("broker input channel closed")]
    InputClosed,
    #[error("broker is not running")]
    Stopped,
}
