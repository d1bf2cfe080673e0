use thiserror::Error;

/// Failures raised while decoding or validating BattlEye packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("malformed packet: {len} bytes is shorter than the header")]
    MalformedPacket { len: usize },
    #[error("invalid packet header: missing 'BE' magic")]
    InvalidHeader,
    #[error("invalid packet header end: expected 0xFF, got {0:#04x}")]
    InvalidHeaderEnd(u8),
    #[error("checksum mismatch: packet carries {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("packet too short to contain a sequence number")]
    TruncatedSequence,
    #[error("packet too short to contain a packet type")]
    TruncatedType,
    #[error("invalid login packet: expected 9 bytes, got {len}")]
    InvalidLoginPacket { len: usize },
    #[error("server rejected login")]
    LoginRejected,
    #[error("unknown login response code {0:#04x}")]
    UnknownLoginResponse(u8),
    #[error("invalid fragment {index} of {count}")]
    InvalidFragment { index: u8, count: u8 },
    #[error("fragment claims {count} parts, earlier fragments claimed {expected}")]
    FragmentCountMismatch { expected: u8, count: u8 },
}

impl PacketError {
    /// True for errors caused by a damaged or tampered checksum.
    pub fn is_checksum(&self) -> bool {
        matches!(self, PacketError::ChecksumMismatch { .. })
    }
}
