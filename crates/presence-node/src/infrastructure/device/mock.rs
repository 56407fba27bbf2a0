//! Recording device collaborators for tests.
//!
//! # Why recording collaborators?
//!
//! Scene objects, speakers and sensors cannot be observed from Rust test
//! code.  These replacements push every call into a `Mutex<Vec<...>>` (or a
//! shared log) so assertions can check exactly what a session did and in which
//! order.
//!
//! # Usage in tests
//!
//! ```ignore
//! let presences = RecordingPresenceFactory::new();
//! let collaborators = Collaborators {
//!     presences: Arc::new(presences.clone()),
//!     ..
//! };
//! // ... run the session ...
//! assert_eq!(presences.spawned_count(), 1);
//! assert!(presences.is_playing(id));
//! ```
//!
//! The unit tests inside `application` use `mockall` for the single-method
//! traits; these types exist for the multi-node integration tests, where a
//! plain record of calls reads better than a list of expectations.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use presence_core::{Quat, Vec3};

use crate::application::collaborators::{
    AudioSink, DeviceTracker, DiagnosticsSink, PresenceFactory, RemotePresence, SensorSource,
};
use crate::application::transport::ConnectionId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call made on a recorded presence.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceCall {
    Spawned { endpoint: SocketAddr },
    Placed { position: Vec3, rotation: Quat },
    Played(i32),
    Stopped,
    Despawned,
}

/// Spawns presences that record into a log shared with the factory.
///
/// Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingPresenceFactory {
    calls: Arc<Mutex<Vec<(ConnectionId, PresenceCall)>>>,
}

impl RecordingPresenceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call in order, tagged with the connection it was made for.
    pub fn calls(&self) -> Vec<(ConnectionId, PresenceCall)> {
        lock(&self.calls).clone()
    }

    /// Calls made on the presence for `id`.
    pub fn calls_for(&self, id: ConnectionId) -> Vec<PresenceCall> {
        lock(&self.calls)
            .iter()
            .filter(|(call_id, _)| *call_id == id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn spawned_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(_, call)| matches!(call, PresenceCall::Spawned { .. }))
            .count()
    }

    /// Ids that were spawned and not yet despawned.
    pub fn live(&self) -> Vec<ConnectionId> {
        let mut live: HashMap<ConnectionId, bool> = HashMap::new();
        let mut order = Vec::new();
        for (id, call) in lock(&self.calls).iter() {
            match call {
                PresenceCall::Spawned { .. } => {
                    live.insert(*id, true);
                    order.push(*id);
                }
                PresenceCall::Despawned => {
                    live.insert(*id, false);
                }
                _ => {}
            }
        }
        order.into_iter().filter(|id| live.get(id) == Some(&true)).collect()
    }

    pub fn despawned(&self, id: ConnectionId) -> bool {
        self.calls_for(id).contains(&PresenceCall::Despawned)
    }

    /// Position of the most recent `place` call for `id`.
    pub fn last_position(&self, id: ConnectionId) -> Option<Vec3> {
        self.calls_for(id).into_iter().rev().find_map(|call| match call {
            PresenceCall::Placed { position, .. } => Some(position),
            _ => None,
        })
    }

    /// `true` if the latest audio call for `id` was a play.
    pub fn is_playing(&self, id: ConnectionId) -> bool {
        self.calls_for(id)
            .into_iter()
            .rev()
            .find_map(|call| match call {
                PresenceCall::Played(_) => Some(true),
                PresenceCall::Stopped => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl PresenceFactory for RecordingPresenceFactory {
    fn spawn(&self, id: ConnectionId, endpoint: SocketAddr) -> Box<dyn RemotePresence> {
        lock(&self.calls).push((id, PresenceCall::Spawned { endpoint }));
        Box::new(RecordingPresence {
            id,
            calls: Arc::clone(&self.calls),
        })
    }
}

struct RecordingPresence {
    id: ConnectionId,
    calls: Arc<Mutex<Vec<(ConnectionId, PresenceCall)>>>,
}

impl RecordingPresence {
    fn push(&self, call: PresenceCall) {
        lock(&self.calls).push((self.id, call));
    }
}

impl AudioSink for RecordingPresence {
    fn play(&self, sound_index: i32) {
        self.push(PresenceCall::Played(sound_index));
    }

    fn stop(&self) {
        self.push(PresenceCall::Stopped);
    }
}

impl RemotePresence for RecordingPresence {
    fn place(&self, position: Vec3, rotation: Quat) {
        self.push(PresenceCall::Placed { position, rotation });
    }

    fn despawn(&self) {
        self.push(PresenceCall::Despawned);
    }
}

/// Records local sound feedback.  `None` in `events` is a stop.
#[derive(Default)]
pub struct RecordingAudioSink {
    pub events: Mutex<Vec<Option<i32>>>,
}

impl RecordingAudioSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for RecordingAudioSink {
    fn play(&self, sound_index: i32) {
        lock(&self.events).push(Some(sound_index));
    }

    fn stop(&self) {
        lock(&self.events).push(None);
    }
}

/// Keeps every recorded diagnostic value.
#[derive(Default)]
pub struct RecordingDiagnostics {
    pub entries: Mutex<Vec<(String, String)>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value recorded under `key`.
    pub fn latest(&self, key: &str) -> Option<String> {
        lock(&self.entries)
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn record(&self, key: &str, value: &str) {
        lock(&self.entries).push((key.to_string(), value.to_string()));
    }
}

/// A tracker whose pose the test sets directly.
pub struct ScriptedTracker {
    pose: Mutex<(Vec3, Quat)>,
}

impl ScriptedTracker {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            pose: Mutex::new((position, rotation)),
        }
    }

    pub fn set_pose(&self, position: Vec3, rotation: Quat) {
        *lock(&self.pose) = (position, rotation);
    }
}

impl Default for ScriptedTracker {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY)
    }
}

impl DeviceTracker for ScriptedTracker {
    fn world_pose(&self) -> (Vec3, Quat) {
        *lock(&self.pose)
    }
}

/// A rotation sensor with a fixed reading, or no sensor at all.
pub struct ScriptedSensor {
    rotation: Option<Quat>,
}

impl ScriptedSensor {
    pub fn present(rotation: Quat) -> Self {
        Self {
            rotation: Some(rotation),
        }
    }

    pub fn absent() -> Self {
        Self { rotation: None }
    }
}

impl SensorSource for ScriptedSensor {
    fn has_rotation_sensor(&self) -> bool {
        self.rotation.is_some()
    }

    fn current_rotation(&self) -> Quat {
        self.rotation.unwrap_or(Quat::IDENTITY)
    }
}
