// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Jonas Keller

//! Concurrent throughput benchmarks.
//!
//! Producer and consumer run on separate threads over two mappings of the
//! same shared memory object, the way two real contexts would use the
//! channel.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shmpipe_core::{RingBuffer, SharedMemoryRegion, HEADER_SIZE};
use std::thread;
use std::time::{Duration, Instant};

/// Chunk sizes for streaming benchmarks.
const CHUNK_SIZES: &[usize] = &[64, 1024, 16384];

/// Ring capacity used for all streaming runs.
const RING_BYTES: usize = HEADER_SIZE + 64 * 1024;

/// Bytes streamed per measured iteration batch.
const STREAM_BYTES: usize = 8 * 1024 * 1024;

fn bench_spsc_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_streaming");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for &chunk in CHUNK_SIZES {
        group.throughput(Throughput::Bytes(STREAM_BYTES as u64));

        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter_custom(|iters| {
                let name = format!("shmpipe-bench-{}-{}", chunk, std::process::id());
                let produce_side =
                    SharedMemoryRegion::create(&name, RING_BYTES).expect("create region");
                let consume_side =
                    SharedMemoryRegion::open(&name, RING_BYTES).expect("open region");

                let mut tx = RingBuffer::create(&produce_side)
                    .expect("create ring")
                    .into_producer();
                let mut rx = RingBuffer::attach(&consume_side)
                    .expect("attach ring")
                    .into_consumer();

                let total = STREAM_BYTES * iters as usize;
                let payload = vec![0xABu8; chunk];
                let mut sink = vec![0u8; chunk * 2];

                let start = Instant::now();
                thread::scope(|s| {
                    s.spawn(|| {
                        let mut sent = 0;
                        while sent < total {
                            let want = chunk.min(total - sent);
                            match tx.write(&payload[..want]).expect("write") {
                                0 => std::hint::spin_loop(),
                                n => sent += n,
                            }
                        }
                    });

                    let mut received = 0;
                    while received < total {
                        match rx.read(&mut sink).expect("read") {
                            0 => std::hint::spin_loop(),
                            n => received += n,
                        }
                    }
                });
                start.elapsed()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spsc_streaming);
criterion_main!(benches);
