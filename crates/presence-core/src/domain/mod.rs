//! Domain types for presence sync.
//!
//! Pure pose math with no networking or device dependencies.  Everything here
//! can be compiled and tested on any platform without external setup.

/// Vectors, quaternions, and the synchronized [`pose::TransformState`].
pub mod pose;

/// The shared reference frame all relative positions are computed against.
pub mod anchor;
