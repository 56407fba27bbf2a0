//! Simulated device collaborators for the headless binary.

use std::net::SocketAddr;
use std::time::Instant;

use presence_core::{Quat, Vec3};
use tracing::{info, trace};

use crate::application::collaborators::{
    AudioSink, DeviceTracker, PresenceFactory, RemotePresence, SensorSource,
};
use crate::application::transport::ConnectionId;

/// A tracker that walks a horizontal circle around the origin, turning as it
/// goes.
pub struct SimulatedTracker {
    started: Instant,
    radius: f32,
    /// Angular speed in degrees per second.
    speed: f32,
}

impl SimulatedTracker {
    pub fn new(radius: f32, degrees_per_second: f32) -> Self {
        Self {
            started: Instant::now(),
            radius,
            speed: degrees_per_second,
        }
    }

    /// Pose after `elapsed_secs` seconds of walking.
    pub fn pose_at(&self, elapsed_secs: f32) -> (Vec3, Quat) {
        let degrees = (elapsed_secs * self.speed) % 360.0;
        let radians = degrees.to_radians();
        let position = Vec3::new(self.radius * radians.cos(), 0.0, self.radius * radians.sin());
        (position, Quat::from_yaw_degrees(degrees))
    }
}

impl Default for SimulatedTracker {
    fn default() -> Self {
        Self::new(1.0, 10.0)
    }
}

impl DeviceTracker for SimulatedTracker {
    fn world_pose(&self) -> (Vec3, Quat) {
        self.pose_at(self.started.elapsed().as_secs_f32())
    }
}

/// A platform without a dedicated rotation sensor.
pub struct NoRotationSensor;

impl SensorSource for NoRotationSensor {
    fn has_rotation_sensor(&self) -> bool {
        false
    }

    fn current_rotation(&self) -> Quat {
        Quat::IDENTITY
    }
}

/// Local sound feedback written to the log.
pub struct LoggingAudio;

impl AudioSink for LoggingAudio {
    fn play(&self, sound_index: i32) {
        info!("local sound {sound_index} started");
    }

    fn stop(&self) {
        info!("local sound stopped");
    }
}

/// Spawns [`LoggingPresence`]s.
pub struct LoggingPresenceFactory;

impl PresenceFactory for LoggingPresenceFactory {
    fn spawn(&self, id: ConnectionId, endpoint: SocketAddr) -> Box<dyn RemotePresence> {
        info!("peer {endpoint} joined ({id})");
        Box::new(LoggingPresence { endpoint })
    }
}

/// A remote peer represented only by log lines.
pub struct LoggingPresence {
    endpoint: SocketAddr,
}

impl AudioSink for LoggingPresence {
    fn play(&self, sound_index: i32) {
        info!("peer {} plays sound {sound_index}", self.endpoint);
    }

    fn stop(&self) {
        info!("peer {} stopped its sound", self.endpoint);
    }
}

impl RemotePresence for LoggingPresence {
    fn place(&self, position: Vec3, rotation: Quat) {
        trace!(
            "peer {} at ({:.2}, {:.2}, {:.2}) yaw {:.1}",
            self.endpoint,
            position.x,
            position.y,
            position.z,
            rotation.yaw_degrees()
        );
    }

    fn despawn(&self) {
        info!("peer {} removed", self.endpoint);
    }
}
