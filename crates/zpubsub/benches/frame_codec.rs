// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame Codec Benchmark
//!
//! Measures encode and incremental decode cost of two-frame event messages
//! (16-byte header + payload) for a range of payload sizes.

#![allow(clippy::uninlined_format_args)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use zpubsub::transport::frame::{encode_greeting, encode_message};
use zpubsub::transport::{FrameCodec, Inbound};
use zpubsub::{EventId, SocketKind};

const PAYLOAD_SIZES: &[usize] = &[0, 64, 1024, 64 * 1024];

fn bench_encode(c: &mut Criterion) {
    let header = EventId::from_name("bench.Event").to_wire();
    let mut group = c.benchmark_group("frame_encode");
    for &size in PAYLOAD_SIZES {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes((16 + size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let mut buf = Vec::with_capacity(32 + size);
            b.iter(|| {
                buf.clear();
                encode_message(&[header.as_slice(), payload.as_slice()], &mut buf);
                black_box(buf.len())
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let header = EventId::from_name("bench.Event").to_wire();
    let mut group = c.benchmark_group("frame_decode");
    for &size in PAYLOAD_SIZES {
        let payload = vec![0xCDu8; size];
        let mut encoded = Vec::new();
        encode_message(&[header.as_slice(), payload.as_slice()], &mut encoded);

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            let mut codec = FrameCodec::new(1 << 20);
            codec.feed(&encode_greeting(SocketKind::Pub));
            let _ = codec.decode();
            b.iter(|| {
                codec.feed(encoded);
                match codec.decode() {
                    Ok(Some(Inbound::Message(parts))) => black_box(parts.len()),
                    other => panic!("unexpected decode result: {:?}", other),
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
