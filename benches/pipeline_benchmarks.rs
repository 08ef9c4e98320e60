//! Performance benchmarks for the per-frame hot paths
//!
//! Run with: cargo bench --bench pipeline_benchmarks
//!
//! Everything here runs once per 20ms audio read or per video frame, so a
//! regression shows up directly as capture-thread latency.

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crabcast::audio::{
    max_magnitude, mix_to_bytes, to_le_bytes, PendingAudioFrame, PendingFrameQueue,
    SilentFillConfig, SilentFillMode, SilentFiller,
};
use crabcast::testing::{sine_samples, synthetic_screen_frame};

/// Interleaved samples per read at 48kHz stereo
const READ_SIZES: [(&str, usize); 3] = [("10ms", 480), ("20ms", 960), ("40ms", 1920)];

fn bench_mixing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Mixing");
    group.measurement_time(Duration::from_secs(5));

    for (name, frames) in READ_SIZES {
        let internal = sine_samples(0, frames, 2, 48_000, 6000);
        let mic = sine_samples(3, frames, 2, 48_000, 9000);
        group.throughput(Throughput::Elements(internal.len() as u64));
        group.bench_with_input(BenchmarkId::new("mix_to_bytes", name), &frames, |b, _| {
            b.iter(|| mix_to_bytes(black_box(&internal), black_box(&mic)))
        });
        group.bench_with_input(BenchmarkId::new("to_le_bytes", name), &frames, |b, _| {
            b.iter(|| to_le_bytes(black_box(&mic)))
        });
        group.bench_with_input(BenchmarkId::new("max_magnitude", name), &frames, |b, _| {
            b.iter(|| max_magnitude(black_box(&mic)))
        });
    }
    group.finish();
}

fn bench_silent_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("Silent Fill");
    let silence = vec![0i16; 1920];

    let modes = [
        ("noise", SilentFillMode::LowAmplitudeNoise),
        ("fixed", SilentFillMode::FixedLowValue),
        ("hybrid", SilentFillMode::Hybrid),
    ];
    for (name, mode) in modes {
        let config = SilentFillConfig {
            enabled: true,
            mode,
            initial_period_ms: 0,
            ..SilentFillConfig::default()
        };
        let mut filler = SilentFiller::new(config, Instant::now()).with_seed(7);
        group.bench_function(BenchmarkId::new("apply", name), |b| {
            b.iter(|| filler.apply(black_box(&silence), Instant::now()))
        });
    }
    group.finish();
}

fn bench_pending_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pending Queue");
    let frame = vec![0u8; 3840];

    group.bench_function("push_drain", |b| {
        let queue = PendingFrameQueue::new();
        b.iter(|| {
            for _ in 0..4 {
                queue.push_back(PendingAudioFrame::new(frame.clone(), Instant::now()));
            }
            let _ = queue.drain(|bytes, _| -> Result<usize, std::convert::Infallible> {
                Ok(black_box(bytes).len())
            });
        })
    });
    group.finish();
}

fn bench_screen_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("Synthetic Screen");
    let resolutions = [("360p", 640u32, 360u32), ("720p", 1280, 720)];

    for (name, width, height) in resolutions {
        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_function(BenchmarkId::new("frame", name), |b| {
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                synthetic_screen_frame(black_box(n), width, height)
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_mixing,
    bench_silent_fill,
    bench_pending_queue,
    bench_screen_frames
);
criterion_main!(benches);
