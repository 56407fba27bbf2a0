//! Protocol module containing packet types, the binary codec, transport
//! frames, and reliable-channel sequencing.

pub mod codec;
pub mod frame;
pub mod messages;
pub mod sequence;

pub use codec::{decode_packet, encode_packet, ProtocolError};
pub use frame::{decode_frame, encode_frame, Frame, FrameKind};
pub use messages::*;
pub use sequence::{OrderedReceiver, ReliableSender, SequenceNumber};
