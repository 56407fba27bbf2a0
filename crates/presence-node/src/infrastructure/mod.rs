//! Infrastructure layer for the presence node.
//!
//! Contains the adapters behind the application layer's trait seams.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `presence_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`transport`** – [`transport::PeerTransport`], the connection table that
//!   implements the application's `Transport` trait on top of any
//!   [`transport::DatagramSocket`].  Two sockets are provided: a real UDP
//!   socket with a background receive thread, and an in-memory network for
//!   multi-node tests.
//!
//! - **`device`** – Simulated device collaborators for the headless binary,
//!   plus recording collaborators for tests.
//!
//! - **`config`** – TOML configuration loaded from the platform config
//!   directory.

pub mod config;
pub mod device;
pub mod transport;
