//! presence-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does a presence node do? (for beginners)
//!
//! Every device in the room runs one node.  A node:
//!
//! 1. Broadcasts a discovery request on the local network every two seconds
//!    until it is connected to at least one peer.
//! 2. Answers other nodes' discovery requests, and connects directly to any
//!    node that answers its own.
//! 3. Once connected, streams its pose (position relative to the shared
//!    anchor, plus orientation) to every peer on every tick over an
//!    unreliable channel.  A lost pose update is simply replaced by the next.
//! 4. Sends sound start/stop events over a reliable, ordered channel so a
//!    "stop" can never be overtaken by a stale "play".
//! 5. Keeps one record per connected peer and places that peer's presence
//!    relative to its own view of the anchor.

/// Application layer: registry, router, connection manager, sync loop.
pub mod application;

/// Infrastructure layer: transports, device adapters, configuration.
pub mod infrastructure;
