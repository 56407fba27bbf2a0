//! Binary codec for application packets and the primitives they are built
//! from.
//!
//! Every primitive has a `write_*` function that appends to a buffer and a
//! `read_*` function that takes a cursor and returns the value together with
//! the cursor advanced past it.  No range checks are applied to decoded floats:
//! a non-unit quaternion or a huge vector decodes exactly as sent.
//!
//! Wire format: see [`crate::protocol::messages`].

use thiserror::Error;

use crate::domain::pose::{Quat, TransformState, Vec3};
use crate::protocol::messages::{Packet, PacketType, TAG_SIZE};

/// Errors that can occur while decoding bytes from the network.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the field being read.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The leading packet tag is not a recognised value.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// The leading transport frame byte is not a recognised value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The payload could not be parsed (UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Packets ───────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] as `[tag][payload]`.
///
/// # Examples
///
/// ```rust
/// use presence_core::{decode_packet, encode_packet, Packet};
///
/// let bytes = encode_packet(&Packet::Sound(2));
/// assert_eq!(bytes, vec![1, 2, 0, 0, 0]);
/// assert_eq!(decode_packet(&bytes).unwrap(), Packet::Sound(2));
/// ```
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(packet.encoded_len());
    buf.push(packet.packet_type() as u8);
    match packet {
        Packet::Transform(state) => write_transform(&mut buf, state),
        Packet::Sound(index) => write_i32(&mut buf, *index),
        Packet::Stop => {}
    }
    buf
}

/// Decodes one [`Packet`] from `bytes`.
///
/// Bytes beyond the payload of the tagged variant are ignored.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownPacketType`] for an unrecognised tag and
/// [`ProtocolError::InsufficientData`] for an empty or truncated buffer.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    let (tag, cursor) = read_u8(bytes, 0)?;
    let packet_type = PacketType::try_from(tag).map_err(|_| ProtocolError::UnknownPacketType(tag))?;
    debug_assert_eq!(cursor, TAG_SIZE);

    match packet_type {
        PacketType::Transform => {
            let (state, _) = read_transform(bytes, cursor)?;
            Ok(Packet::Transform(state))
        }
        PacketType::Sound => {
            let (index, _) = read_i32(bytes, cursor)?;
            Ok(Packet::Sound(index))
        }
        PacketType::Stop => Ok(Packet::Stop),
    }
}

// ── Composite primitives ──────────────────────────────────────────────────────

/// Writes position then rotation: 28 bytes.
pub fn write_transform(buf: &mut Vec<u8>, state: &TransformState) {
    write_vec3(buf, state.position);
    write_quat(buf, state.rotation);
}

pub fn read_transform(buf: &[u8], offset: usize) -> Result<(TransformState, usize), ProtocolError> {
    let (position, offset) = read_vec3(buf, offset)?;
    let (rotation, offset) = read_quat(buf, offset)?;
    Ok((TransformState { position, rotation }, offset))
}

pub fn write_vec3(buf: &mut Vec<u8>, v: Vec3) {
    write_f32(buf, v.x);
    write_f32(buf, v.y);
    write_f32(buf, v.z);
}

pub fn read_vec3(buf: &[u8], offset: usize) -> Result<(Vec3, usize), ProtocolError> {
    let (x, offset) = read_f32(buf, offset)?;
    let (y, offset) = read_f32(buf, offset)?;
    let (z, offset) = read_f32(buf, offset)?;
    Ok((Vec3 { x, y, z }, offset))
}

pub fn write_quat(buf: &mut Vec<u8>, q: Quat) {
    write_f32(buf, q.x);
    write_f32(buf, q.y);
    write_f32(buf, q.z);
    write_f32(buf, q.w);
}

pub fn read_quat(buf: &[u8], offset: usize) -> Result<(Quat, usize), ProtocolError> {
    let (x, offset) = read_f32(buf, offset)?;
    let (y, offset) = read_f32(buf, offset)?;
    let (z, offset) = read_f32(buf, offset)?;
    let (w, offset) = read_f32(buf, offset)?;
    Ok((Quat { x, y, z, w }, offset))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
pub fn write_token(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    write_u16(buf, len);
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
pub fn read_token(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let (len, start) = read_u16(buf, offset)?;
    let bytes = take(buf, start, len as usize)?;
    let s = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8 token: {e}")))?
        .to_string();
    Ok((s, start + len as usize))
}

// ── Scalar primitives ─────────────────────────────────────────────────────────

pub fn write_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_f32(buf: &[u8], offset: usize) -> Result<(f32, usize), ProtocolError> {
    let bytes = take_array::<4>(buf, offset)?;
    Ok((f32::from_le_bytes(bytes), offset + 4))
}

pub fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_i32(buf: &[u8], offset: usize) -> Result<(i32, usize), ProtocolError> {
    let bytes = take_array::<4>(buf, offset)?;
    Ok((i32::from_le_bytes(bytes), offset + 4))
}

pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<(u16, usize), ProtocolError> {
    let bytes = take_array::<2>(buf, offset)?;
    Ok((u16::from_le_bytes(bytes), offset + 2))
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<(u32, usize), ProtocolError> {
    let bytes = take_array::<4>(buf, offset)?;
    Ok((u32::from_le_bytes(bytes), offset + 4))
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<(u8, usize), ProtocolError> {
    let [b] = take_array::<1>(buf, offset)?;
    Ok((b, offset + 1))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ProtocolError> {
    let end = offset.saturating_add(len);
    buf.get(offset..end).ok_or(ProtocolError::InsufficientData {
        needed: end,
        available: buf.len(),
    })
}

fn take_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ProtocolError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, offset, N)?);
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
