//! Stateless construction and validation of BattlEye packets.

use crate::{
    PacketError, PacketType, Sequence, HEADER_END, HEADER_MAGIC, HEADER_SIZE, LOGIN_FAIL,
    LOGIN_OK, LOGIN_RESPONSE_SIZE, MULTI_MARKER, SEQUENCE_OFFSET, TYPE_OFFSET,
};

/// Position of a fragment inside a multi-packet command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub count: u8,
    pub index: u8,
}

/// CRC32 (IEEE) as used in the packet header.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Truncates a sequence to the single byte carried on the wire.
pub fn wire_sequence(seq: Sequence) -> u8 {
    (seq & 0xFF) as u8
}

/// Builds a complete packet: header, checksum, sentinel, type and payload.
///
/// The checksum covers the `0xFF` sentinel, the type byte and the payload,
/// so the same inputs always produce the same bytes.
pub fn build_packet(payload: &[u8], packet_type: PacketType) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + payload.len());
    body.push(HEADER_END);
    body.push(packet_type.to_u8());
    body.extend_from_slice(payload);

    let mut packet = Vec::with_capacity(HEADER_MAGIC.len() + 4 + body.len());
    packet.extend_from_slice(&HEADER_MAGIC);
    packet.extend_from_slice(&checksum(&body).to_le_bytes());
    packet.extend_from_slice(&body);
    packet
}

pub fn build_login_packet(password: &str) -> Vec<u8> {
    build_packet(password.as_bytes(), PacketType::Login)
}

pub fn build_cmd_packet(cmd: &str, seq: Sequence) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + cmd.len());
    payload.push(wire_sequence(seq));
    payload.extend_from_slice(cmd.as_bytes());
    build_packet(&payload, PacketType::Command)
}

/// An empty command; the server answers with a pingback carrying no data.
pub fn build_keep_alive_packet(seq: Sequence) -> Vec<u8> {
    build_packet(&[wire_sequence(seq)], PacketType::Command)
}

/// Acknowledges a server message. The server resends unacknowledged messages.
pub fn build_msg_ack_packet(seq: Sequence) -> Vec<u8> {
    build_packet(&[wire_sequence(seq)], PacketType::ServerMessage)
}

pub fn build_login_response(accepted: bool) -> Vec<u8> {
    let code = if accepted { LOGIN_OK } else { LOGIN_FAIL };
    build_packet(&[code], PacketType::Login)
}

/// Single-packet answer to a command (or a pingback when `body` is empty).
pub fn build_cmd_response(seq: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(seq);
    payload.extend_from_slice(body);
    build_packet(&payload, PacketType::Command)
}

/// Splits `body` into multi-packet response fragments of at most
/// `max_fragment` bytes each, in index order.
///
/// The fragment count is a single byte, so the fragment size grows when
/// `body` would otherwise need more than 255 fragments.
pub fn build_multi_response(seq: u8, body: &[u8], max_fragment: usize) -> Vec<Vec<u8>> {
    let size = max_fragment
        .max(1)
        .max(body.len().div_ceil(u8::MAX as usize));

    let parts: Vec<&[u8]> = if body.is_empty() {
        vec![body]
    } else {
        body.chunks(size).collect()
    };
    let count = parts.len() as u8;

    parts
        .iter()
        .enumerate()
        .map(|(index, part)| {
            let mut payload = Vec::with_capacity(4 + part.len());
            payload.extend_from_slice(&[seq, MULTI_MARKER, count, index as u8]);
            payload.extend_from_slice(part);
            build_packet(&payload, PacketType::Command)
        })
        .collect()
}

pub fn build_server_message(seq: u8, message: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + message.len());
    payload.push(seq);
    payload.extend_from_slice(message.as_bytes());
    build_packet(&payload, PacketType::ServerMessage)
}

fn embedded_checksum(packet: &[u8]) -> Result<u32, PacketError> {
    if packet.len() < HEADER_SIZE {
        return Err(PacketError::MalformedPacket { len: packet.len() });
    }
    if packet[..2] != HEADER_MAGIC {
        return Err(PacketError::InvalidHeader);
    }
    if packet[6] != HEADER_END {
        return Err(PacketError::InvalidHeaderEnd(packet[6]));
    }
    Ok(u32::from_le_bytes([packet[2], packet[3], packet[4], packet[5]]))
}

fn verify_checksum(packet: &[u8]) -> Result<(), PacketError> {
    let expected = embedded_checksum(packet)?;
    let actual = checksum(&packet[6..]);
    if expected != actual {
        return Err(PacketError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Checks header, checksum and the presence of a type byte.
///
/// The sequence byte is not required here: an empty command is a valid packet.
/// Use [`sequence`] where one is needed.
pub fn verify(packet: &[u8]) -> Result<(), PacketError> {
    verify_checksum(packet)?;
    packet_type(packet)?;
    Ok(())
}

pub fn sequence(packet: &[u8]) -> Result<u8, PacketError> {
    packet
        .get(SEQUENCE_OFFSET)
        .copied()
        .ok_or(PacketError::TruncatedSequence)
}

pub fn packet_type(packet: &[u8]) -> Result<PacketType, PacketError> {
    packet
        .get(TYPE_OFFSET)
        .map(|b| PacketType::from_u8(*b))
        .ok_or(PacketError::TruncatedType)
}

/// Everything after the type byte.
pub fn data(packet: &[u8]) -> Result<&[u8], PacketError> {
    if packet.len() < HEADER_SIZE {
        return Err(PacketError::MalformedPacket { len: packet.len() });
    }
    if packet.len() < SEQUENCE_OFFSET {
        return Err(PacketError::TruncatedType);
    }
    Ok(&packet[SEQUENCE_OFFSET..])
}

/// Validates the server's answer to a login packet.
pub fn verify_login(packet: &[u8]) -> Result<(), PacketError> {
    if packet.len() != LOGIN_RESPONSE_SIZE {
        return Err(PacketError::InvalidLoginPacket { len: packet.len() });
    }
    verify_checksum(packet)?;

    match packet[SEQUENCE_OFFSET] {
        LOGIN_OK => Ok(()),
        LOGIN_FAIL => Err(PacketError::LoginRejected),
        other => Err(PacketError::UnknownLoginResponse(other)),
    }
}

/// Detects a multi-packet response fragment.
///
/// Looking at the bytes from the type onwards, a fragment reads
/// `0x01 seq 0x00 count index`. Anything shorter or different is a single
/// packet and yields `None`.
pub fn multi(packet: &[u8]) -> Option<Fragment> {
    let region = packet.get(TYPE_OFFSET..)?;
    if region.len() < 5 {
        return None;
    }
    if region[0] != PacketType::Command.to_u8() || region[2] != MULTI_MARKER {
        return None;
    }
    Some(Fragment {
        count: region[3],
        index: region[4],
    })
}

/// The response text carried by a command response, without the sequence
/// byte and without the fragment header of multi-packet responses.
pub fn response_body(packet: &[u8]) -> Result<&[u8], PacketError> {
    let payload = data(packet)?;
    if payload.is_empty() {
        return Err(PacketError::TruncatedSequence);
    }
    match multi(packet) {
        Some(_) => Ok(&payload[4..]),
        None => Ok(&payload[1..]),
    }
}
