//! Integration tests for the presence-core protocol codec.
//!
//! These tests drive packets through the public API nested inside transport
//! frames, the same way a node puts them on the wire, and exercise the
//! reliable channel end to end over a lossy, reordering link.

use std::time::{Duration, Instant};

use presence_core::{
    decode_frame, decode_packet, encode_frame, encode_packet,
    protocol::{sequence::SequenceNumber, OrderedReceiver, ReliableSender},
    Frame, Packet, ProtocolError, Quat, TransformState, Vec3,
};

/// Wraps a packet in the frame its delivery method selects, then unwraps it.
fn through_frame(packet: Packet, sequence: u16) -> Packet {
    let payload = encode_packet(&packet);
    let frame = match packet.delivery() {
        presence_core::protocol::DeliveryMethod::Unreliable => Frame::Unreliable { payload },
        presence_core::protocol::DeliveryMethod::ReliableOrdered => Frame::Reliable {
            sequence: SequenceNumber(sequence),
            payload,
        },
    };
    let bytes = encode_frame(&frame);
    let inner = match decode_frame(&bytes).expect("frame must decode") {
        Frame::Unreliable { payload } | Frame::Reliable { payload, .. } => payload,
        other => panic!("unexpected frame {other:?}"),
    };
    decode_packet(&inner).expect("packet must decode")
}

#[test]
fn test_transform_survives_unreliable_frame_bit_exact() {
    let state = TransformState::new(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
    match through_frame(Packet::Transform(state), 0) {
        Packet::Transform(decoded) => assert!(decoded.bits_eq(&state)),
        other => panic!("unexpected packet {other:?}"),
    }
}

#[test]
fn test_sound_survives_reliable_frame() {
    assert_eq!(through_frame(Packet::Sound(3), 41), Packet::Sound(3));
}

#[test]
fn test_stop_survives_reliable_frame() {
    assert_eq!(through_frame(Packet::Stop, 65535), Packet::Stop);
}

#[test]
fn test_malformed_tag_inside_valid_frame_is_reported() {
    let bytes = encode_frame(&Frame::Unreliable { payload: vec![7] });
    let Frame::Unreliable { payload } = decode_frame(&bytes).unwrap() else {
        panic!("expected unreliable frame");
    };
    assert_eq!(decode_packet(&payload), Err(ProtocolError::UnknownPacketType(7)));
}

#[test]
fn test_reliable_channel_delivers_play_then_stop_over_lossy_reordering_link() {
    // Arrange
    let resend = Duration::from_millis(100);
    let mut sender = ReliableSender::new();
    let mut receiver = OrderedReceiver::new();
    let t0 = Instant::now();
    sender.push(encode_packet(&Packet::Sound(1)));
    sender.push(encode_packet(&Packet::Stop));

    // Act – first transmission: "play" is lost, "stop" arrives
    let first = sender.due(t0, resend);
    assert_eq!(first.len(), 2);
    let (stop_seq, stop_payload) = first[1].clone();
    let early = receiver.receive(stop_seq, stop_payload).expect("in window");
    assert!(early.is_empty(), "stop must wait for play");
    assert!(sender.acknowledge(stop_seq));

    // Retransmission carries only the unacknowledged "play"
    let retry = sender.due(t0 + resend, resend);
    assert_eq!(retry.len(), 1);
    let (play_seq, play_payload) = retry[0].clone();
    let released = receiver.receive(play_seq, play_payload).expect("in window");

    // Assert
    let packets: Vec<Packet> = released.iter().map(|p| decode_packet(p).unwrap()).collect();
    assert_eq!(packets, vec![Packet::Sound(1), Packet::Stop]);
}
