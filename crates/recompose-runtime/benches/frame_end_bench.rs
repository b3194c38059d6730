//! Benchmarks for frame-end dispatch and relocation passes.
//!
//! Run with: cargo bench -p recompose-runtime --bench frame_end_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use recompose_core::PositionHash;
use recompose_runtime::{DescriptorId, FrameEndScheduler, Placement, RelocationPool};
use std::hint::black_box;

// =============================================================================
// Frame-end scheduling
// =============================================================================

fn bench_schedule_and_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_end/schedule_flush");

    for count in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("actions", count), &count, |b, &count| {
            let scheduler = FrameEndScheduler::new(|| {});
            b.iter(|| {
                for _ in 0..count {
                    let _ = scheduler.schedule_end_of_frame(|| {
                        black_box(());
                    });
                }
                black_box(scheduler.mark_frame_complete())
            });
        });
    }

    group.finish();
}

fn bench_cancel_half(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_end/cancel_half");
    let count = 256usize;
    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("actions/256", |b| {
        let scheduler = FrameEndScheduler::new(|| {});
        b.iter(|| {
            let mut handles = Vec::with_capacity(count);
            for _ in 0..count {
                if let Ok(handle) = scheduler.schedule_end_of_frame(|| {}) {
                    handles.push(handle);
                }
            }
            for handle in handles.iter().step_by(2) {
                handle.cancel();
            }
            black_box(scheduler.mark_frame_complete())
        });
    });
    group.finish();
}

// =============================================================================
// Relocation
// =============================================================================

fn bench_relocation_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("relocation/pass");

    for count in [8u32, 64, 512] {
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::new("moves", count), &count, |b, &count| {
            let mut pool: RelocationPool<u32, u32> = RelocationPool::new();
            let mut live: Vec<_> = (0..count)
                .map(|i| {
                    pool.instantiate(
                        DescriptorId::from_raw(i % 8),
                        i,
                        0,
                        PositionHash::from_raw(u64::from(i)),
                        Vec::new(),
                    )
                })
                .collect();

            b.iter(|| {
                for entry in live.drain(..) {
                    pool.report_departure(entry.descriptor(), entry);
                }
                for i in 0..count {
                    let descriptor = DescriptorId::from_raw(i % 8);
                    let position = PositionHash::from_raw(u64::from(i).rotate_left(7));
                    if let Placement::Moved(entry) = pool.request_placement(descriptor, i, position)
                    {
                        live.push(entry);
                    }
                }
                black_box(pool.end_pass().disposed.len())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_schedule_and_flush,
    bench_cancel_half,
    bench_relocation_pass
);
criterion_main!(benches);
