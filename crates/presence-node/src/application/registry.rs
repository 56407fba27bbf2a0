//! PeerRegistry: one record per connected peer.
//!
//! The registry is the only owner of [`PeerRecord`]s.  A record is created
//! when a connection is established and destroyed when it closes; nothing
//! else can construct or delete one.  Other components reach a record by its
//! [`ConnectionId`] and never hold on to it across ticks.
//!
//! # Teardown order (for beginners)
//!
//! Each record owns the peer's [`RemotePresence`], the thing the user
//! actually sees and hears.  [`PeerRegistry::unregister`] calls
//! [`RemotePresence::despawn`] before it returns, so there is never a frame
//! where a disconnected peer is still rendered or still audible.
//!
//! # HashMap choice
//!
//! A `HashMap<ConnectionId, PeerRecord>` gives the router O(1) lookup for
//! every inbound packet.  Iteration order does not matter: every peer is
//! placed independently each tick.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use presence_core::TransformState;
use thiserror::Error;

use crate::application::collaborators::RemotePresence;
use crate::application::transport::ConnectionId;

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection must not be registered twice.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
    #[error("no peer registered for connection {0}")]
    NotFound(ConnectionId),
}

/// Synchronized state of one connected peer.
pub struct PeerRecord {
    id: ConnectionId,
    endpoint: SocketAddr,
    transform: TransformState,
    playing: bool,
    presence: Box<dyn RemotePresence>,
}

impl PeerRecord {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// The most recently received pose.  Last write wins.
    pub fn transform(&self) -> TransformState {
        self.transform
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn presence(&self) -> &dyn RemotePresence {
        self.presence.as_ref()
    }

    pub fn apply_transform(&mut self, state: TransformState) {
        self.transform = state;
    }

    /// Starts `sound_index` on the peer's presence and marks it playing.
    pub fn play(&mut self, sound_index: i32) {
        self.presence.play(sound_index);
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.presence.stop();
        self.playing = false;
    }
}

/// In-memory registry of connected peers.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<ConnectionId, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record for a newly established connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `id` already has a
    /// record.  The existing record is left untouched and the rejected
    /// `presence` is despawned so it cannot linger.
    pub fn register(
        &mut self,
        id: ConnectionId,
        endpoint: SocketAddr,
        presence: Box<dyn RemotePresence>,
    ) -> Result<&mut PeerRecord, RegistryError> {
        match self.peers.entry(id) {
            Entry::Occupied(_) => {
                presence.despawn();
                Err(RegistryError::AlreadyRegistered(id))
            }
            Entry::Vacant(slot) => Ok(slot.insert(PeerRecord {
                id,
                endpoint,
                transform: TransformState::default(),
                playing: false,
                presence,
            })),
        }
    }

    /// Removes the record for `id`, despawning its presence first.
    ///
    /// Returns `false` (and does nothing) if `id` has no record.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        match self.peers.remove(&id) {
            Some(record) => {
                record.presence.despawn();
                true
            }
            None => false,
        }
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` has no record.
    pub fn lookup(&self, id: ConnectionId) -> Result<&PeerRecord, RegistryError> {
        self.peers.get(&id).ok_or(RegistryError::NotFound(id))
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` has no record.
    pub fn lookup_mut(&mut self, id: ConnectionId) -> Result<&mut PeerRecord, RegistryError> {
        self.peers.get_mut(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Unregisters every peer.  Returns how many were removed.
    pub fn drain(&mut self) -> usize {
        let count = self.peers.len();
        for (_, record) in self.peers.drain() {
            record.presence.despawn();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::collaborators::AudioSink;
    use presence_core::{Quat, Vec3};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    // ── Recording presence ────────────────────────────────────────────────────

    #[derive(Default)]
    struct Log {
        plays: Vec<i32>,
        stops: usize,
        despawns: usize,
    }

    struct RecordingPresence(Arc<Mutex<Log>>);

    impl AudioSink for RecordingPresence {
        fn play(&self, sound_index: i32) {
            self.0.lock().unwrap().plays.push(sound_index);
        }
        fn stop(&self) {
            self.0.lock().unwrap().stops += 1;
        }
    }

    impl RemotePresence for RecordingPresence {
        fn place(&self, _position: Vec3, _rotation: Quat) {}
        fn despawn(&self) {
            self.0.lock().unwrap().despawns += 1;
        }
    }

    fn presence() -> (Box<dyn RemotePresence>, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        (Box::new(RecordingPresence(Arc::clone(&log))), log)
    }

    fn endpoint() -> SocketAddr {
        "192.168.1.20:8888".parse().unwrap()
    }

    // ── register / lookup ─────────────────────────────────────────────────────

    #[test]
    fn test_register_creates_record_with_default_state() {
        // Arrange
        let mut registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        let (p, _log) = presence();

        // Act
        let record = registry.register(id, endpoint(), p).unwrap();

        // Assert
        assert_eq!(record.id(), id);
        assert_eq!(record.endpoint(), endpoint());
        assert!(!record.is_playing());
        assert!(record.transform().bits_eq(&TransformState::default()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_double_register_is_rejected_and_keeps_existing_record() {
        // Arrange
        let mut registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        let (first, first_log) = presence();
        let (second, second_log) = presence();
        registry.register(id, endpoint(), first).unwrap().play(2);

        // Act
        let result = registry.register(id, endpoint(), second);

        // Assert
        assert_eq!(result.err(), Some(RegistryError::AlreadyRegistered(id)));
        assert!(registry.lookup(id).unwrap().is_playing(), "existing record untouched");
        assert_eq!(first_log.lock().unwrap().despawns, 0);
        assert_eq!(second_log.lock().unwrap().despawns, 1, "rejected presence is torn down");
    }

    #[test]
    fn test_lookup_unknown_id_returns_not_found() {
        let registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        assert_eq!(registry.lookup(id).err(), Some(RegistryError::NotFound(id)));
    }

    // ── unregister ────────────────────────────────────────────────────────────

    #[test]
    fn test_unregister_despawns_before_returning() {
        // Arrange
        let mut registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        let (p, log) = presence();
        registry.register(id, endpoint(), p).unwrap();

        // Act
        let removed = registry.unregister(id);

        // Assert
        assert!(removed);
        assert_eq!(log.lock().unwrap().despawns, 1);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_unregister_unknown_id_is_noop() {
        let mut registry = PeerRegistry::new();
        assert!(!registry.unregister(Uuid::new_v4()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain_despawns_every_peer() {
        // Arrange
        let mut registry = PeerRegistry::new();
        let logs: Vec<_> = (0..3)
            .map(|_| {
                let (p, log) = presence();
                registry.register(Uuid::new_v4(), endpoint(), p).unwrap();
                log
            })
            .collect();

        // Act
        let drained = registry.drain();

        // Assert
        assert_eq!(drained, 3);
        assert!(registry.is_empty());
        assert!(logs.iter().all(|l| l.lock().unwrap().despawns == 1));
    }

    // ── record mutation ───────────────────────────────────────────────────────

    #[test]
    fn test_play_then_stop_updates_flag_and_presence() {
        // Arrange
        let mut registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        let (p, log) = presence();
        registry.register(id, endpoint(), p).unwrap();
        let record = registry.lookup_mut(id).unwrap();

        // Act
        record.play(3);
        record.stop();

        // Assert
        assert!(!record.is_playing());
        assert_eq!(log.lock().unwrap().plays, vec![3]);
        assert_eq!(log.lock().unwrap().stops, 1);
    }

    #[test]
    fn test_apply_transform_is_last_write_wins() {
        let mut registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        let (p, _log) = presence();
        let record = registry.register(id, endpoint(), p).unwrap();

        record.apply_transform(TransformState::new(Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY));
        record.apply_transform(TransformState::new(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY));

        assert_eq!(record.transform().position, Vec3::new(1.0, 0.0, 0.0));
    }
}
