//! Packet router: applies one inbound application packet to the record of
//! the peer it arrived from.
//!
//! | Tag | Packet      | Effect on the peer's record                       |
//! |-----|-------------|---------------------------------------------------|
//! | 0   | `Transform` | replace the last-known pose                        |
//! | 1   | `Sound(i)`  | `presence.play(i)`, mark playing                   |
//! | 2   | `Stop`      | `presence.stop()`, clear playing                   |
//!
//! Every path touches at most one record, found by connection id.  A packet
//! is decoded before the lookup, so a malformed packet is always reported as
//! a protocol error even if its sender has already gone.

use presence_core::{decode_packet, Packet, PacketType, ProtocolError, SoundId};
use thiserror::Error;
use tracing::debug;

use crate::application::registry::PeerRegistry;
use crate::application::transport::ConnectionId;

/// Error type for routing an inbound packet.  Neither variant is fatal.
#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    /// Unknown tag or truncated payload.  The packet is dropped.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The sender has no record, typically a packet racing its teardown.
    #[error("no peer registered for connection {0}")]
    UnknownPeer(ConnectionId),
}

/// Decodes `bytes` and applies the packet to the record registered for `from`.
///
/// Returns the type of the packet that was applied.
///
/// # Errors
///
/// Returns [`RouteError::Protocol`] if the bytes do not decode, or
/// [`RouteError::UnknownPeer`] if `from` has no record.  The registry is
/// unchanged in both cases.
pub fn route_packet(
    registry: &mut PeerRegistry,
    from: ConnectionId,
    bytes: &[u8],
) -> Result<PacketType, RouteError> {
    let packet = decode_packet(bytes)?;
    let record = registry
        .lookup_mut(from)
        .map_err(|_| RouteError::UnknownPeer(from))?;

    match packet {
        Packet::Transform(state) => record.apply_transform(state),
        Packet::Sound(index) => {
            if SoundId::try_from(index).is_err() {
                debug!("peer {} played uncatalogued sound index {index}", record.endpoint());
            }
            record.play(index);
        }
        Packet::Stop => record.stop(),
    }
    Ok(packet.packet_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::collaborators::{AudioSink, RemotePresence};
    use presence_core::{encode_packet, Quat, TransformState, Vec3};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Default)]
    struct AudioLog {
        events: Vec<String>,
    }

    struct LoggingPresence(Arc<Mutex<AudioLog>>);

    impl AudioSink for LoggingPresence {
        fn play(&self, sound_index: i32) {
            self.0.lock().unwrap().events.push(format!("play {sound_index}"));
        }
        fn stop(&self) {
            self.0.lock().unwrap().events.push("stop".to_string());
        }
    }

    impl RemotePresence for LoggingPresence {
        fn place(&self, _: Vec3, _: Quat) {}
        fn despawn(&self) {}
    }

    fn registry_with_peer() -> (PeerRegistry, ConnectionId, Arc<Mutex<AudioLog>>) {
        let mut registry = PeerRegistry::new();
        let id = Uuid::new_v4();
        let log = Arc::new(Mutex::new(AudioLog::default()));
        let endpoint: SocketAddr = "10.0.0.2:8888".parse().unwrap();
        registry
            .register(id, endpoint, Box::new(LoggingPresence(Arc::clone(&log))))
            .unwrap();
        (registry, id, log)
    }

    #[test]
    fn test_transform_packet_updates_record_pose() {
        // Arrange
        let (mut registry, id, _log) = registry_with_peer();
        let state = TransformState::new(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);

        // Act
        let kind = route_packet(&mut registry, id, &encode_packet(&Packet::Transform(state)));

        // Assert
        assert_eq!(kind, Ok(PacketType::Transform));
        assert!(registry.lookup(id).unwrap().transform().bits_eq(&state));
    }

    #[test]
    fn test_sound_packet_plays_and_marks_playing() {
        let (mut registry, id, log) = registry_with_peer();

        route_packet(&mut registry, id, &encode_packet(&Packet::Sound(2))).unwrap();

        assert!(registry.lookup(id).unwrap().is_playing());
        assert_eq!(log.lock().unwrap().events, vec!["play 2"]);
    }

    #[test]
    fn test_uncatalogued_sound_index_is_still_forwarded() {
        let (mut registry, id, log) = registry_with_peer();

        route_packet(&mut registry, id, &encode_packet(&Packet::Sound(42))).unwrap();

        assert_eq!(log.lock().unwrap().events, vec!["play 42"]);
    }

    #[test]
    fn test_stop_after_play_with_interleaved_transforms_leaves_peer_stopped() {
        // Arrange
        let (mut registry, id, log) = registry_with_peer();
        let pose = encode_packet(&Packet::Transform(TransformState::default()));

        // Act
        route_packet(&mut registry, id, &encode_packet(&Packet::Sound(1))).unwrap();
        for _ in 0..5 {
            route_packet(&mut registry, id, &pose).unwrap();
        }
        route_packet(&mut registry, id, &encode_packet(&Packet::Stop)).unwrap();
        for _ in 0..5 {
            route_packet(&mut registry, id, &pose).unwrap();
        }

        // Assert
        assert!(!registry.lookup(id).unwrap().is_playing());
        assert_eq!(log.lock().unwrap().events, vec!["play 1", "stop"]);
    }

    #[test]
    fn test_unknown_tag_is_protocol_error_and_leaves_registry_unchanged() {
        // Arrange
        let (mut registry, id, log) = registry_with_peer();

        // Act
        let result = route_packet(&mut registry, id, &[7, 1, 2, 3]);

        // Assert
        assert_eq!(result, Err(RouteError::Protocol(ProtocolError::UnknownPacketType(7))));
        assert_eq!(registry.len(), 1);
        assert!(!registry.lookup(id).unwrap().is_playing());
        assert!(log.lock().unwrap().events.is_empty());
    }

    #[test]
    fn test_truncated_transform_is_protocol_error() {
        let (mut registry, id, _log) = registry_with_peer();

        let result = route_packet(&mut registry, id, &[0, 0, 0]);

        assert!(matches!(
            result,
            Err(RouteError::Protocol(ProtocolError::InsufficientData { .. }))
        ));
    }

    #[test]
    fn test_packet_from_unregistered_peer_is_reported() {
        let (mut registry, _id, _log) = registry_with_peer();
        let stranger = Uuid::new_v4();

        let result = route_packet(&mut registry, stranger, &encode_packet(&Packet::Stop));

        assert_eq!(result, Err(RouteError::UnknownPeer(stranger)));
    }
}
