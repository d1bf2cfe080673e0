//! # BattlEye RCON Protocol
//!
//! Wire-level building blocks shared by the RCON client and the mock server.
//! Nothing in this crate performs I/O; every function takes and returns plain
//! byte slices so it can be exercised without a socket.
//!
//! ## Packet Layout
//!
//! ```text
//! ┌────────┬────────┬────────────────────┬──────┬──────┬──────────────┐
//! │ 'B'(1) │ 'E'(1) │ CRC32 LE (4)       │ 0xFF │ type │ payload ...  │
//! └────────┴────────┴────────────────────┴──────┴──────┴──────────────┘
//!                     └ computed over every byte from the 0xFF onwards
//! ```
//!
//! Command, keep-alive and server-message packets carry a one byte sequence
//! number as the first payload byte. Multi-packet command responses insert a
//! `0x00 count index` fragment header right after the sequence.
//!
//! ## Module Organization
//!
//! ### Codec (`codec`)
//! Stateless packet construction and validation: checksum, header checks,
//! field extraction and multi-packet marker detection.
//!
//! ### Errors (`error`)
//! [`PacketError`], the failure taxonomy of the codec.
//!
//! ### Events (`event`)
//! [`Event`], the immutable value produced for every server-pushed message.

mod codec;
mod error;
mod event;

pub use codec::{
    build_cmd_packet, build_cmd_response, build_keep_alive_packet, build_login_packet,
    build_login_response, build_msg_ack_packet, build_multi_response, build_packet,
    build_server_message, checksum, data, multi, packet_type, response_body, sequence, verify,
    verify_login, wire_sequence, Fragment,
};
pub use error::PacketError;
pub use event::{Event, EventKind, CHAT_CHANNELS};

/// Size of the fixed header: `B`, `E`, four checksum bytes and the `0xFF` sentinel.
pub const HEADER_SIZE: usize = 7;
/// Offset of the packet type byte.
pub const TYPE_OFFSET: usize = 7;
/// Offset of the sequence byte in command, keep-alive and server-message packets.
pub const SEQUENCE_OFFSET: usize = 8;
/// Exact size of a login response.
pub const LOGIN_RESPONSE_SIZE: usize = 9;

pub const HEADER_MAGIC: [u8; 2] = *b"BE";
pub const HEADER_END: u8 = 0xFF;

/// Login response code for accepted credentials.
pub const LOGIN_OK: u8 = 0x01;
/// Login response code for rejected credentials.
pub const LOGIN_FAIL: u8 = 0x00;
/// Marker byte following the sequence in a multi-packet response fragment.
pub const MULTI_MARKER: u8 = 0x00;

/// Largest datagram either side is expected to send.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Sequence numbers are tracked as `u32` but only the low byte travels on the wire.
pub type Sequence = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Login,
    Command,
    ServerMessage,
    /// Anything else; receivers ignore these.
    Unknown(u8),
}

impl PacketType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => PacketType::Login,
            0x01 => PacketType::Command,
            0x02 => PacketType::ServerMessage,
            _ => PacketType::Unknown(value),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            PacketType::Login => 0x00,
            PacketType::Command => 0x01,
            PacketType::ServerMessage => 0x02,
            PacketType::Unknown(v) => v,
        }
    }
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        PacketType::from_u8(value)
    }
}
