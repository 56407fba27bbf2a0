//! Application packet types.
//!
//! Wire layout:
//! ```text
//! [type:1][payload:N]
//!   Transform -> [pos.x:4][pos.y:4][pos.z:4][rot.x:4][rot.y:4][rot.z:4][rot.w:4]
//!   Sound     -> [index:4]
//!   Stop      -> (empty)
//! ```
//! Floats are IEEE-754 binary32, integers are two's-complement; every
//! multi-byte field is little-endian.  There is no version negotiation, so
//! every participant must agree on this layout.

use serde::{Deserialize, Serialize};

use crate::domain::pose::TransformState;

/// Size of the leading type tag in bytes.
pub const TAG_SIZE: usize = 1;

/// Encoded size of a 3-component `f32` vector.
pub const VEC3_SIZE: usize = 12;

/// Encoded size of an `(x, y, z, w)` `f32` quaternion.
pub const QUAT_SIZE: usize = 16;

/// Payload size of a `Transform` packet.
pub const TRANSFORM_PAYLOAD_SIZE: usize = VEC3_SIZE + QUAT_SIZE;

/// Payload size of a `Sound` packet.
pub const SOUND_PAYLOAD_SIZE: usize = 4;

/// Leading type tag of every application packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Transform = 0,
    Sound = 1,
    Stop = 2,
}

impl TryFrom<u8> for PacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(PacketType::Transform),
            1 => Ok(PacketType::Sound),
            2 => Ok(PacketType::Stop),
            _ => Err(()),
        }
    }
}

/// How a packet should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// Best effort: may be lost, duplicated, or reordered.
    Unreliable,
    /// Retransmitted until acknowledged and released to the receiver in send
    /// order.
    ReliableOrdered,
}

/// A decoded application packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Latest pose of the sender.
    Transform(TransformState),
    /// Start playing the sound with this index.
    Sound(i32),
    /// Stop the currently playing sound.
    Stop,
}

impl Packet {
    /// Returns the [`PacketType`] tag for this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Transform(_) => PacketType::Transform,
            Packet::Sound(_) => PacketType::Sound,
            Packet::Stop => PacketType::Stop,
        }
    }

    /// The channel this packet is sent on.
    ///
    /// Poses are superseded every tick, so losing one costs nothing.  A stop
    /// must never be overtaken by a stale play, so sound events are ordered.
    pub fn delivery(&self) -> DeliveryMethod {
        match self {
            Packet::Transform(_) => DeliveryMethod::Unreliable,
            Packet::Sound(_) | Packet::Stop => DeliveryMethod::ReliableOrdered,
        }
    }

    /// Total encoded length including the tag.
    pub fn encoded_len(&self) -> usize {
        TAG_SIZE
            + match self {
                Packet::Transform(_) => TRANSFORM_PAYLOAD_SIZE,
                Packet::Sound(_) => SOUND_PAYLOAD_SIZE,
                Packet::Stop => 0,
            }
    }
}

/// Catalogue of the sounds the application ships with.
///
/// The wire carries a raw `i32`; indices outside this catalogue are still
/// forwarded to the audio collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SoundId {
    Trumpet = 1,
    Violin = 2,
    Orchestra = 3,
    Other = 4,
}

impl SoundId {
    pub fn index(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for SoundId {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, ()> {
        match value {
            1 => Ok(SoundId::Trumpet),
            2 => Ok(SoundId::Violin),
            3 => Ok(SoundId::Orchestra),
            4 => Ok(SoundId::Other),
            _ => Err(()),
        }
    }
}
