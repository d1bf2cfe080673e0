//! # BattlEye RCON Client Library
//!
//! This library implements the client side of the BattlEye RCON protocol: it
//! logs in to a game server over UDP, keeps the session alive, sends text
//! commands, reassembles their (possibly multi-packet) responses and hands
//! server-pushed chat and event messages to any number of consumers.
//!
//! ## Architecture Overview
//!
//! ### Capabilities and the Façade
//! The [`rcon`] module defines three small traits, [`rcon::Client`],
//! [`rcon::Connection`] and [`rcon::Transmission`], plus the [`rcon::Rcon`]
//! façade that wraps one connection behind a mutex. The façade never sees
//! BattlEye specifics, so another game's protocol only has to provide the
//! three traits.
//!
//! ### Sessions
//! A [`battleye::Connection`] is either closed (no socket) or open. Opening
//! dials the server, performs the login handshake under short deadlines and
//! then starts two supervised tasks:
//! - a writer sending a keep-alive every interval so the server does not
//!   drop the session, and
//! - a reader that hands every datagram to its own packet-handling task.
//!
//! Closing cancels both, waits for them and every in-flight handler, and only
//! then releases the socket.
//!
//! ### Requests and Responses
//! Every command gets the next sequence number and a [`battleye::Transmission`]
//! registered under it. Responses may be split across several fragments that
//! arrive in any order; the transmission completes once all of them are in,
//! and its completion is latched so late waiters still see it.
//!
//! ### Server Events
//! Server messages are acknowledged (the server repeats unacknowledged ones),
//! classified as chat or generic events and offered to every subscriber. A
//! subscription lives until its [`CancellationToken`](tokio_util::sync::CancellationToken)
//! is cancelled. Delivery never blocks: a subscriber with a full queue misses
//! the event.
//!
//! ## Module Organization
//!
//! ### BattlEye (`battleye`)
//! Connection, packet dispatch and transmissions for the BattlEye protocol.
//!
//! ### Broker (`broker`)
//! A generic fan-out from one input channel to many subscribers, used to
//! split one event stream between independent consumers.
//!
//! ### Configuration (`config`)
//! Address, credentials and timing knobs for a connection.
//!
//! ### Errors (`error`)
//! [`ClientError`] and [`BrokerError`].
//!
//! ### Subscriptions (`subscription`)
//! The subscriber registry shared by connections and the broker.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::battleye;
//! use client::config::ConnectionConfig;
//! use client::rcon::Rcon;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("127.0.0.1:2306", "password");
//!     let rcon = Rcon::new(battleye::Client::new(config));
//!     rcon.connect().await?;
//!
//!     // Receive chat and events until the token is cancelled
//!     let (events, mut rx) = mpsc::channel(64);
//!     let token = CancellationToken::new();
//!     rcon.subscribe(token.clone(), events).await?;
//!
//!     let players = rcon.write("players").await?;
//!     println!("{}", players.wait(Duration::from_secs(5)).await?);
//!
//!     token.cancel();
//!     rcon.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod battleye;
pub mod broker;
pub mod config;
pub mod error;
pub mod rcon;
pub mod subscription;

pub use broker::{Broker, BrokerHandle};
pub use config::ConnectionConfig;
pub use error::{BrokerError, ClientError};
pub use rcon::Rcon;
pub use subscription::SubscriptionId;
