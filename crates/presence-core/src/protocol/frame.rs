//! Transport frames: the outermost layer of every datagram.
//!
//! Wire format:
//! ```text
//! [kind:1][body:N]
//!   DiscoveryRequest  0x10  [token_len:2][token:N]
//!   DiscoveryResponse 0x11  [token_len:2][token:N]
//!   ConnectRequest    0x20  [token_len:2][token:N][session:4]
//!   ConnectAccept     0x21  [session:4]
//!   ConnectReject     0x22
//!   Disconnect        0x23
//!   Unreliable        0x30  [packet:N]
//!   Reliable          0x31  [seq:2][packet:N]
//!   Ack               0x32  [seq:2]
//!   Ping              0x40  [id:2]
//!   Pong              0x41  [id:2]
//! ```
//! Multi-byte integers are little-endian, matching the packet codec.
//!
//! `session` is a random nonce drawn once per transport instance.  A node
//! that restarts on the same address announces a different one, which is how
//! the remote side tells a new session from a retransmitted handshake.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::{
    read_token, read_u16, read_u32, read_u8, write_token, write_u16, write_u32, ProtocolError,
};
use crate::protocol::sequence::SequenceNumber;

/// Leading byte of every transport frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    // Unconnected (0x10–0x1F)
    DiscoveryRequest = 0x10,
    DiscoveryResponse = 0x11,
    // Handshake / lifecycle (0x20–0x2F)
    ConnectRequest = 0x20,
    ConnectAccept = 0x21,
    ConnectReject = 0x22,
    Disconnect = 0x23,
    // Data (0x30–0x3F)
    Unreliable = 0x30,
    Reliable = 0x31,
    Ack = 0x32,
    // Keep-alive (0x40–0x4F)
    Ping = 0x40,
    Pong = 0x41,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x10 => Ok(FrameKind::DiscoveryRequest),
            0x11 => Ok(FrameKind::DiscoveryResponse),
            0x20 => Ok(FrameKind::ConnectRequest),
            0x21 => Ok(FrameKind::ConnectAccept),
            0x22 => Ok(FrameKind::ConnectReject),
            0x23 => Ok(FrameKind::Disconnect),
            0x30 => Ok(FrameKind::Unreliable),
            0x31 => Ok(FrameKind::Reliable),
            0x32 => Ok(FrameKind::Ack),
            0x40 => Ok(FrameKind::Ping),
            0x41 => Ok(FrameKind::Pong),
            _ => Err(()),
        }
    }
}

/// A decoded transport frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    DiscoveryRequest { token: String },
    DiscoveryResponse { token: String },
    ConnectRequest { token: String, session: u32 },
    ConnectAccept { session: u32 },
    ConnectReject,
    Disconnect,
    Unreliable { payload: Vec<u8> },
    Reliable { sequence: SequenceNumber, payload: Vec<u8> },
    Ack { sequence: SequenceNumber },
    Ping { id: u16 },
    Pong { id: u16 },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::DiscoveryRequest { .. } => FrameKind::DiscoveryRequest,
            Frame::DiscoveryResponse { .. } => FrameKind::DiscoveryResponse,
            Frame::ConnectRequest { .. } => FrameKind::ConnectRequest,
            Frame::ConnectAccept { .. } => FrameKind::ConnectAccept,
            Frame::ConnectReject => FrameKind::ConnectReject,
            Frame::Disconnect => FrameKind::Disconnect,
            Frame::Unreliable { .. } => FrameKind::Unreliable,
            Frame::Reliable { .. } => FrameKind::Reliable,
            Frame::Ack { .. } => FrameKind::Ack,
            Frame::Ping { .. } => FrameKind::Ping,
            Frame::Pong { .. } => FrameKind::Pong,
        }
    }
}

/// Encodes a [`Frame`] into a datagram.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(frame.kind() as u8);
    match frame {
        Frame::DiscoveryRequest { token } | Frame::DiscoveryResponse { token } => {
            write_token(&mut buf, token)
        }
        Frame::ConnectRequest { token, session } => {
            write_token(&mut buf, token);
            write_u32(&mut buf, *session);
        }
        Frame::ConnectAccept { session } => write_u32(&mut buf, *session),
        Frame::ConnectReject | Frame::Disconnect => {}
        Frame::Unreliable { payload } => buf.extend_from_slice(payload),
        Frame::Reliable { sequence, payload } => {
            write_u16(&mut buf, sequence.0);
            buf.extend_from_slice(payload);
        }
        Frame::Ack { sequence } => write_u16(&mut buf, sequence.0),
        Frame::Ping { id } | Frame::Pong { id } => write_u16(&mut buf, *id),
    }
    buf
}

/// Decodes a datagram into a [`Frame`].
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownFrameKind`] for an unrecognised leading
/// byte, or a decoding error for a truncated body.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    let (kind_byte, cursor) = read_u8(bytes, 0)?;
    let kind = FrameKind::try_from(kind_byte).map_err(|_| ProtocolError::UnknownFrameKind(kind_byte))?;

    let frame = match kind {
        FrameKind::DiscoveryRequest => Frame::DiscoveryRequest {
            token: read_token(bytes, cursor)?.0,
        },
        FrameKind::DiscoveryResponse => Frame::DiscoveryResponse {
            token: read_token(bytes, cursor)?.0,
        },
        FrameKind::ConnectRequest => {
            let (token, next) = read_token(bytes, cursor)?;
            Frame::ConnectRequest {
                token,
                session: read_u32(bytes, next)?.0,
            }
        }
        FrameKind::ConnectAccept => Frame::ConnectAccept {
            session: read_u32(bytes, cursor)?.0,
        },
        FrameKind::ConnectReject => Frame::ConnectReject,
        FrameKind::Disconnect => Frame::Disconnect,
        FrameKind::Unreliable => Frame::Unreliable {
            payload: bytes[cursor..].to_vec(),
        },
        FrameKind::Reliable => {
            let (seq, body) = read_u16(bytes, cursor)?;
            Frame::Reliable {
                sequence: SequenceNumber(seq),
                payload: bytes[body..].to_vec(),
            }
        }
        FrameKind::Ack => Frame::Ack {
            sequence: SequenceNumber(read_u16(bytes, cursor)?.0),
        },
        FrameKind::Ping => Frame::Ping {
            id: read_u16(bytes, cursor)?.0,
        },
        FrameKind::Pong => Frame::Pong {
            id: read_u16(bytes, cursor)?.0,
        },
    };
    Ok(frame)
}
