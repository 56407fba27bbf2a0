//! Criterion benchmarks for the presence packet codec.
//!
//! Transform packets are encoded once per tick per node and decoded once per
//! tick per peer, so they dominate codec time.
//!
//! Run with:
//! ```bash
//! cargo bench --package presence-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use presence_core::protocol::sequence::SequenceNumber;
use presence_core::{
    decode_frame, decode_packet, encode_frame, encode_packet, Frame, Packet, Quat,
    TransformState, Vec3,
};

fn fixtures() -> Vec<(&'static str, Packet)> {
    vec![
        (
            "transform",
            Packet::Transform(TransformState::new(
                Vec3::new(1.25, 0.0, -3.5),
                Quat::from_yaw_degrees(42.0),
            )),
        ),
        ("sound", Packet::Sound(2)),
        ("stop", Packet::Stop),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_packet");
    for (name, packet) in fixtures() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &packet, |b, p| {
            b.iter(|| encode_packet(black_box(p)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_packet");
    for (name, packet) in fixtures() {
        let bytes = encode_packet(&packet);
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes)))
        });
    }
    group.finish();
}

fn bench_framed_transform(c: &mut Criterion) {
    let packet = fixtures().remove(0).1;
    c.bench_function("framed_transform_round_trip", |b| {
        b.iter(|| {
            let bytes = encode_frame(&Frame::Unreliable {
                payload: encode_packet(black_box(&packet)),
            });
            match decode_frame(&bytes) {
                Ok(Frame::Unreliable { payload }) => decode_packet(&payload).ok(),
                _ => None,
            }
        })
    });
    c.bench_function("framed_reliable_stop", |b| {
        b.iter(|| {
            encode_frame(&Frame::Reliable {
                sequence: SequenceNumber(black_box(7)),
                payload: encode_packet(&Packet::Stop),
            })
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_framed_transform);
criterion_main!(benches);
