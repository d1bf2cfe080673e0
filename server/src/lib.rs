//! # Mock BattlEye RCON Server Library
//!
//! A small UDP server that speaks enough of the BattlEye RCON protocol to
//! develop and test clients without a game server. It is deliberately
//! simple: commands are echoed or answered from a table, but every protocol
//! path a client has to handle is reachable.
//!
//! ## Core Responsibilities
//!
//! ### Login
//! A login packet with the configured password opens a session for the
//! sender's address; anything else is refused with the fail code. Packets
//! from addresses without a session are ignored, except for logins.
//!
//! ### Commands and Keep-Alives
//! An empty command (only the sequence byte) is a keep-alive and is
//! answered with a pingback. Other commands get their canned response, or
//! an echo of the command text. Responses longer than the configured
//! fragment size go out as a multi-packet response, optionally last
//! fragment first.
//!
//! ### Server Messages
//! Messages can be pushed to every session on demand through a
//! [`ServerHandle`] or periodically. Each session has its own message
//! sequence; acknowledgements are counted.
//!
//! ### Session Timeouts
//! Sessions that stay silent longer than the session timeout are dropped,
//! as a real server does when a client stops sending keep-alives.
//!
//! ## Module Organization
//!
//! ### Session Manager Module (`session_manager`)
//! Session tracking by source address, capacity limit, idle timeout and
//! per-session message sequences.
//!
//! ### Network Module (`network`)
//! The socket, the receive task, the timeout checker and the main loop that
//! answers every packet.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{MockServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("password")
//!         .with_response("players", "Players on server: 0")
//!         .with_max_fragment(512);
//!     let server = MockServer::bind("127.0.0.1:2306", config).await?;
//!     let handle = server.handle();
//!
//!     let token = CancellationToken::new();
//!     tokio::spawn(server.run(token.clone()));
//!
//!     handle.broadcast("(Global) Admin: restart in 5 minutes");
//!     token.cancel();
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks:
//! - **Network Receiver**: forwards every datagram to the main loop
//! - **Timeout Checker**: drops idle sessions
//! - **Main Loop**: answers packets and performs broadcasts

pub mod network;
pub mod session_manager;

pub use network::{MockServer, ServerConfig, ServerHandle, ServerStats};
