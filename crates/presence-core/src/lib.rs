//! # presence-core
//!
//! Shared library for presence sync nodes containing the packet codec, the
//! transport frame layout, reliable-channel sequencing, and the pose math used
//! to express positions relative to a shared anchor.
//!
//! It has zero dependencies on sockets, threads, or device APIs.
//!
//! # Architecture overview
//!
//! A handful of co-located devices find each other on the local network,
//! connect directly, and stream their pose to every peer many times a second.
//! Discrete sound start/stop events ride a separate reliable channel.
//!
//! - **`protocol`** – How bytes travel over the network.  Application packets
//!   (`Transform`, `Sound`, `Stop`) are a one-byte tag plus a fixed-layout
//!   payload; they are carried inside transport frames that handle discovery,
//!   the connection handshake, acknowledgements and keep-alive.
//!
//! - **`domain`** – Pure pose math.  Every position on the wire is relative to
//!   a [`LocalAnchorFrame`], so devices with different world origins agree on
//!   where everyone is.

pub mod domain;
pub mod protocol;

pub use domain::anchor::{AnchorPose, AnchorSupplier, LocalAnchorFrame};
pub use domain::pose::{Quat, TransformState, Vec3};
pub use protocol::codec::{decode_packet, encode_packet, ProtocolError};
pub use protocol::frame::{decode_frame, encode_frame, Frame};
pub use protocol::messages::{Packet, PacketType, SoundId};
