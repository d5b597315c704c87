//! Benchmarks for the relay hot paths

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::time::Instant;

use rill_core::{CaptureTime, FanoutConfig, IngestConfig, Segment, SegmentId, StoreConfig};
use rill_fanout::{FanoutRelay, StartAt};
use rill_ingest::Segmenter;
use rill_store::SegmentStore;
use rill_wire::{Frame, FrameDecoder};

fn segment(id: u64, len: usize) -> Segment {
    Segment::new(
        SegmentId::new(id),
        Bytes::from(vec![0xAB; len]),
        CaptureTime::from_millis(id as i64 * 2_000),
        Duration::from_secs(2),
    )
}

fn bench_store_append(c: &mut Criterion) {
    let store = SegmentStore::new(StoreConfig::with_max_segments(64)).unwrap();
    let mut id = 0u64;

    c.bench_function("store_append_evicting", |b| {
        b.iter(|| {
            id += 1;
            store.append(black_box(segment(id, 1024))).unwrap()
        })
    });
}

fn bench_store_range(c: &mut Criterion) {
    let store = SegmentStore::new(StoreConfig::with_max_segments(64)).unwrap();
    for id in 1..=64 {
        store.append(segment(id, 1024)).unwrap();
    }

    c.bench_function("store_range_16", |b| {
        b.iter(|| store.range(black_box(SegmentId::new(40)), black_box(SegmentId::new(55))))
    });
}

fn bench_relay_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay_publish");

    for viewers in [1usize, 16, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(viewers), &viewers, |b, &n| {
            let store = SegmentStore::new(StoreConfig::with_max_segments(8)).unwrap();
            let relay = FanoutRelay::new(FanoutConfig::default()).unwrap();
            let mut subs: Vec<_> = (0..n)
                .map(|_| relay.attach(&store, StartAt::Latest).unwrap())
                .collect();
            let mut id = 0u64;

            b.iter(|| {
                id += 1;
                let seg = segment(id, 4096);
                let report = relay.publish(black_box(&seg));
                for sub in subs.iter_mut() {
                    black_box(sub.try_recv().unwrap());
                }
                report
            })
        });
    }

    group.finish();
}

fn bench_segmenter_push(c: &mut Criterion) {
    let config = IngestConfig {
        max_segment_bytes: 64 * 1024,
        ..Default::default()
    };
    let chunk = vec![0x5A; 16 * 1024];

    c.bench_function("segmenter_push_16k", |b| {
        let mut segmenter = Segmenter::new(config.clone());
        b.iter(|| black_box(segmenter.push(black_box(&chunk), Instant::now())))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let encoded = Frame::Segment(segment(7, 4096)).to_bytes();
    let decoder = FrameDecoder::new(1024 * 1024);

    c.bench_function("frame_decode_4k", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&encoded[..]);
            let frame = decoder.decode(black_box(&mut buf)).unwrap();
            black_box(frame)
        })
    });
}

criterion_group!(
    benches,
    bench_store_append,
    bench_store_range,
    bench_relay_publish,
    bench_segmenter_push,
    bench_frame_decode
);
criterion_main!(benches);
