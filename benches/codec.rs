//! Codec benchmark suite.
//!
//! Benchmarks the wire codecs at different payload sizes:
//! - Engine polling payloads: 1, 16, 256 packets
//! - Socket.IO packets: plain and with binary attachments
//! - Stream framing: one frame per chunk and byte-by-byte
//!
//! Run with: cargo bench --bench codec
//! Results saved to: target/criterion/

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;

use sockeye::protocol::engine::{self, Packet as EnginePacket};
use sockeye::protocol::{Decoder, Packet, StreamDecoder, Value, encode_frame};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[1, 16, 256];
const ATTACHMENT_SIZES: &[usize] = &[64, 4096, 65_536];

fn event_packet(attachment: Option<usize>) -> Packet {
    let mut args = vec![Value::from(json!({
        "user": "alice",
        "text": "hello world",
        "tags": ["a", "b", "c"],
    }))];
    if let Some(len) = attachment {
        args.push(Value::from(vec![7_u8; len]));
    }
    Packet::event("/chat", "message", args)
}

// ============================================================================
// Benchmark: Engine Payloads
// ============================================================================

fn bench_engine_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_payload");

    for &count in PAYLOAD_SIZES {
        let packets: Vec<EnginePacket> = (0..count)
            .map(|i| EnginePacket::message(format!("42[\"tick\",{i}]")))
            .collect();
        let payload = engine::encode_payload(&packets);
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", count), &packets, |b, packets| {
            b.iter(|| engine::encode_payload(packets));
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &payload, |b, payload| {
            b.iter(|| engine::decode_payload(payload).count());
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Socket.IO Packets
// ============================================================================

fn bench_socket_io(c: &mut Criterion) {
    let mut group = c.benchmark_group("socket_io");

    let plain = event_packet(None);
    group.bench_function("encode_plain", |b| {
        b.iter(|| sockeye::protocol::packet::encode(&plain));
    });
    let frames = sockeye::protocol::packet::encode(&plain);
    group.bench_function("decode_plain", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            frames
                .iter()
                .cloned()
                .filter_map(|frame| decoder.add(frame).ok().flatten())
                .count()
        });
    });

    for &len in ATTACHMENT_SIZES {
        let packet = event_packet(Some(len));
        let frames = sockeye::protocol::packet::encode(&packet);
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("encode_binary", len), &packet, |b, packet| {
            b.iter(|| sockeye::protocol::packet::encode(packet));
        });
        group.bench_with_input(BenchmarkId::new("decode_binary", len), &frames, |b, frames| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                frames
                    .iter()
                    .cloned()
                    .filter_map(|frame| decoder.add(frame).ok().flatten())
                    .count()
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Stream Framing
// ============================================================================

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    for &len in ATTACHMENT_SIZES {
        let frame = encode_frame(&EnginePacket::message(Bytes::from(vec![1_u8; len])));
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("whole", len), &frame, |b, frame| {
            b.iter(|| StreamDecoder::new(u64::MAX).push(frame).len());
        });
        group.bench_with_input(BenchmarkId::new("byte_by_byte", len), &frame, |b, frame| {
            b.iter(|| {
                let mut decoder = StreamDecoder::new(u64::MAX);
                frame
                    .chunks(1)
                    .map(|chunk| decoder.push(chunk).len())
                    .sum::<usize>()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_engine_payload, bench_socket_io, bench_framing);
criterion_main!(benches);
