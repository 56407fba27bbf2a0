//! Trait seams for the collaborators outside the sync core.
//!
//! Anchor tracking, audio playback, rendering and on-screen diagnostics are
//! not part of the protocol.  The sync core only calls these traits, and the
//! infrastructure layer (or a test) provides the implementations.
//!
//! All methods take `&self` so implementations can be shared behind an
//! `Arc`; implementations that record state use interior mutability.

use std::net::SocketAddr;

use presence_core::{Quat, Vec3};
use tracing::trace;

use crate::application::transport::ConnectionId;

/// The node's own tracked pose in raw world space.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceTracker: Send + Sync {
    fn world_pose(&self) -> (Vec3, Quat);
}

/// A dedicated rotation sensor (gyroscope), if the platform has one.
#[cfg_attr(test, mockall::automock)]
pub trait SensorSource: Send + Sync {
    fn has_rotation_sensor(&self) -> bool;
    /// Current sensor rotation in raw world space.
    fn current_rotation(&self) -> Quat;
}

/// Somewhere sounds can be played.  No return value is observed.
#[cfg_attr(test, mockall::automock)]
pub trait AudioSink: Send + Sync {
    fn play(&self, sound_index: i32);
    fn stop(&self);
}

/// The externally visible representation of one remote peer.
///
/// Owned by the peer's registry record.  [`RemotePresence::despawn`] is
/// called exactly once, before the record is dropped.
pub trait RemotePresence: AudioSink {
    /// Moves the representation to `position` in the aligned frame.
    fn place(&self, position: Vec3, rotation: Quat);
    fn despawn(&self);
}

/// Creates a [`RemotePresence`] when a peer is registered.
pub trait PresenceFactory: Send + Sync {
    fn spawn(&self, id: ConnectionId, endpoint: SocketAddr) -> Box<dyn RemotePresence>;
}

/// Fire-and-forget key/value status output.  Must never fail.
#[cfg_attr(test, mockall::automock)]
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, key: &str, value: &str);
}

/// Writes diagnostics to `tracing` at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record(&self, key: &str, value: &str) {
        trace!(target: "presence::diagnostics", "{key}: {value}");
    }
}

/// Discards diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn record(&self, _key: &str, _value: &str) {}
}
