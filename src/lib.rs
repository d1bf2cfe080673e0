//! BattlEye RCON client workspace.
//!
//! Re-exports the wire codec and the client so downstream users can depend
//! on a single crate. The mock server lives in the `server` member.

pub use client;
pub use protocol;
