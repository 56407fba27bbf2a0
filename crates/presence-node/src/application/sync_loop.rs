//! State synchronization loop: the per-tick [`Session`].
//!
//! # What happens on every tick? (for beginners)
//!
//! ```text
//! tick(now)
//!  ├─ 1. drain transport events      (connect, disconnect, inbound packets)
//!  ├─ 2. sample local pose           (orientation strategy + tracker)
//!  ├─ 3. relative = aligned(local) − aligned(anchor)
//!  ├─ 4. connected?  send Transform unreliably to every peer
//!  │     otherwise   progress the discovery timer
//!  └─ 5. place every remote peer at aligned(anchor) + its received position
//! ```
//!
//! Sound start/stop is user-triggered and bypasses the tick:
//! [`Session::send_sound`] and [`Session::stop_sound`] queue the packet on the
//! reliable-ordered channel immediately.
//!
//! # One session, no globals
//!
//! The session owns the transport, the connection manager, the peer registry,
//! and the anchor frame.  Every event is handled on the caller's thread inside
//! [`Session::tick`], so the registry needs no locking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use presence_core::protocol::DeliveryMethod;
use presence_core::{
    encode_packet, AnchorPose, AnchorSupplier, LocalAnchorFrame, Packet, Quat, TransformState, Vec3,
};
use tracing::{debug, error, info, warn};

use crate::application::collaborators::{
    AudioSink, DeviceTracker, DiagnosticsSink, PresenceFactory, SensorSource,
};
use crate::application::connection_manager::{
    ConnectionManager, LinkState, PeerEvent, DEFAULT_DISCOVERY_INTERVAL, DEFAULT_DISCOVERY_TOKEN,
};
use crate::application::registry::PeerRegistry;
use crate::application::router::{route_packet, RouteError};
use crate::application::transport::{Transport, TransportEvent};

/// Upper bound on transport polls per tick.
const MAX_POLL_ROUNDS: usize = 4;

// ── Orientation strategies ────────────────────────────────────────────────────

/// Where the local orientation comes from.  Chosen once per session.
pub trait OrientationSource: Send + Sync {
    fn sample(&self, anchor: &AnchorPose) -> Quat;
    fn name(&self) -> &'static str;
}

/// Dedicated rotation sensor, re-expressed in the aligned frame.
pub struct SensorOrientation {
    sensor: Arc<dyn SensorSource>,
}

impl OrientationSource for SensorOrientation {
    fn sample(&self, anchor: &AnchorPose) -> Quat {
        anchor.align_rotation(self.sensor.current_rotation())
    }

    fn name(&self) -> &'static str {
        "rotation sensor"
    }
}

/// The tracker's own rotation.
pub struct TrackerOrientation {
    tracker: Arc<dyn DeviceTracker>,
}

impl OrientationSource for TrackerOrientation {
    fn sample(&self, _anchor: &AnchorPose) -> Quat {
        self.tracker.world_pose().1
    }

    fn name(&self) -> &'static str {
        "device tracker"
    }
}

/// Picks the sensor strategy if the platform reports a rotation sensor,
/// otherwise the tracker strategy.
pub fn select_orientation(
    sensor: Arc<dyn SensorSource>,
    tracker: Arc<dyn DeviceTracker>,
) -> Box<dyn OrientationSource> {
    if sensor.has_rotation_sensor() {
        Box::new(SensorOrientation { sensor })
    } else {
        Box::new(TrackerOrientation { tracker })
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Tunables for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub discovery_token: String,
    pub discovery_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }
}

/// The external collaborators a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tracker: Arc<dyn DeviceTracker>,
    pub sensor: Arc<dyn SensorSource>,
    /// Local feedback for sounds this node sends.
    pub local_audio: Arc<dyn AudioSink>,
    pub presences: Arc<dyn PresenceFactory>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
}

/// One node's running session.
pub struct Session {
    transport: Box<dyn Transport>,
    manager: ConnectionManager,
    registry: PeerRegistry,
    anchor: LocalAnchorFrame,
    orientation: Box<dyn OrientationSource>,
    tracker: Arc<dyn DeviceTracker>,
    local_audio: Arc<dyn AudioSink>,
    presences: Arc<dyn PresenceFactory>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    last_sent: Option<TransformState>,
}

impl Session {
    /// Creates a session.  The orientation strategy is selected here, once.
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        anchor: LocalAnchorFrame,
        collaborators: Collaborators,
    ) -> Self {
        let manager = ConnectionManager::new(
            config.discovery_token,
            config.discovery_interval,
            transport.local_ip(),
        );
        let orientation = select_orientation(
            Arc::clone(&collaborators.sensor),
            Arc::clone(&collaborators.tracker),
        );
        info!("orientation source: {}", orientation.name());

        Self {
            transport,
            manager,
            registry: PeerRegistry::new(),
            anchor,
            orientation,
            tracker: collaborators.tracker,
            local_audio: collaborators.local_audio,
            presences: collaborators.presences,
            diagnostics: collaborators.diagnostics,
            last_sent: None,
        }
    }

    /// Runs one tick.  Never fails; every error is logged and absorbed.
    pub fn tick(&mut self, now: Instant) {
        self.drain_events(now);

        let anchor = self.anchor.current_anchor_pose();
        let (world_position, _) = self.tracker.world_pose();
        let rotation = self.orientation.sample(&anchor);
        let relative = anchor.relative_position(world_position);
        self.diagnostics.record("sent_position", &format_vec3(relative));
        self.diagnostics.record("heading", &format!("{:.1}", -anchor.yaw_degrees));

        if self.transport.connected_count() > 0 {
            let state = TransformState::new(relative, rotation);
            let bytes = encode_packet(&Packet::Transform(state));
            self.transport.send_to_all(&bytes, DeliveryMethod::Unreliable);
            self.last_sent = Some(state);
        } else {
            self.manager.progress_discovery(self.transport.as_mut(), now);
        }
        let failures = self.manager.discovery_failures();
        if failures > 0 {
            self.diagnostics.record("discovery_failures", &failures.to_string());
        }

        for record in self.registry.iter() {
            let received = record.transform();
            let position = anchor.place_relative(received.position);
            record.presence().place(position, received.rotation);
            self.diagnostics.record(
                &format!("remote_position/{}", record.endpoint()),
                &format_vec3(received.position),
            );
        }
        self.diagnostics.record("peers", &self.registry.len().to_string());
    }

    /// Sends a sound start to every peer on the reliable channel and plays
    /// local feedback.  Returns the number of peers it was queued to.
    pub fn send_sound(&mut self, sound_index: i32) -> usize {
        let queued = self
            .transport
            .send_to_all(&encode_packet(&Packet::Sound(sound_index)), DeliveryMethod::ReliableOrdered);
        self.local_audio.play(sound_index);
        debug!("sound {sound_index} queued to {queued} peer(s)");
        queued
    }

    /// Sends a sound stop to every peer on the reliable channel.
    pub fn stop_sound(&mut self) -> usize {
        let queued = self
            .transport
            .send_to_all(&encode_packet(&Packet::Stop), DeliveryMethod::ReliableOrdered);
        self.local_audio.stop();
        debug!("stop queued to {queued} peer(s)");
        queued
    }

    /// Closes every connection and empties the registry.
    ///
    /// Returns how many peers were torn down.
    pub fn shutdown(&mut self, now: Instant) -> usize {
        let before = self.registry.len();
        info!("shutting down; closing {} connection(s)", self.transport.connected_count());
        self.transport.disconnect_all();
        self.drain_events(now);
        let leftover = self.registry.drain();
        if leftover > 0 {
            warn!("{leftover} peer(s) had no disconnect event at shutdown");
        }
        before
    }

    /// Records the world position of a tracked visual anchor.
    pub fn refine_anchor(&mut self, anchor_world: Vec3) {
        self.anchor.refine(anchor_world);
        info!("visual anchor acquired at {}", format_vec3(anchor_world));
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn link_state(&self) -> LinkState {
        self.manager.link_state(self.transport.connected_count())
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// The pose most recently broadcast to peers.
    pub fn last_sent(&self) -> Option<TransformState> {
        self.last_sent
    }

    fn drain_events(&mut self, now: Instant) {
        // Answering a handshake queues its Connected event in the transport;
        // poll again until the registry matches the connection table.
        for _ in 0..MAX_POLL_ROUNDS {
            let events = self.transport.poll(now);
            if events.is_empty() {
                break;
            }
            for event in events {
                self.handle_event(event);
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match self.manager.handle_event(event, self.transport.as_mut()) {
            Some(PeerEvent::Joined { id, endpoint }) => {
                let presence = self.presences.spawn(id, endpoint);
                if let Err(e) = self.registry.register(id, endpoint, presence) {
                    error!("peer registration failed: {e}");
                }
            }
            Some(PeerEvent::Left { id, .. }) => {
                self.registry.unregister(id);
            }
            Some(PeerEvent::Payload { id, payload }) => {
                match route_packet(&mut self.registry, id, &payload) {
                    Ok(_) => {}
                    Err(RouteError::UnknownPeer(id)) => {
                        debug!("dropping packet for unregistered connection {id}");
                    }
                    Err(e @ RouteError::Protocol(_)) => warn!("dropping packet: {e}"),
                }
            }
            None => {}
        }
    }
}

fn format_vec3(v: Vec3) -> String {
    format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
