//! Application layer for the presence node.
//!
//! # What lives here?
//!
//! - **`transport`** – The seam between the node and the network: the
//!   [`transport::Transport`] trait and the events it produces.  Concrete
//!   transports live in the infrastructure layer.
//!
//! - **`collaborators`** – Trait seams for everything outside the sync core:
//!   the device tracker, the rotation sensor, audio output, the on-screen
//!   representation of a remote peer, and the diagnostics sink.
//!
//! - **`registry`** – One [`registry::PeerRecord`] per connected peer.
//!
//! - **`router`** – Decodes an inbound packet and applies it to the record of
//!   the peer it came from.
//!
//! - **`connection_manager`** – Discovery broadcast/response, token checks,
//!   and the unconnected/connecting/connected state machine.
//!
//! - **`sync_loop`** – The per-tick [`sync_loop::Session`] that ties it all
//!   together.

pub mod collaborators;
pub mod connection_manager;
pub mod registry;
pub mod router;
pub mod sync_loop;
pub mod transport;
