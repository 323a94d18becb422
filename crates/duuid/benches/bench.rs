use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use duuid::{
    DuuidGenerator, GeneratorBuilder, GeneratorConfig, GeneratorMode, IdLayout, MILLIS_PER_DAY,
    TimeSource, WorkerIdentity,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

/// A clock parked on one day so benchmarks never cross midnight.
struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

fn fixed_time() -> FixedMockTime {
    // 2025-01-02, day offset 1 of the default epoch.
    FixedMockTime {
        millis: 20_090 * MILLIS_PER_DAY,
    }
}

fn generator(mode: GeneratorMode) -> DuuidGenerator<FixedMockTime> {
    let config = GeneratorConfig {
        mode,
        ..GeneratorConfig::default()
    };
    GeneratorBuilder::new(config)
        .clock(fixed_time())
        .build(WorkerIdentity::new(1))
        .unwrap()
}

fn bench_single_thread(c: &mut Criterion, group_name: &str, mode: GeneratorMode) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = core::time::Duration::ZERO;
            for _ in 0..iters {
                let generator = generator(mode);
                let start = Instant::now();
                for _ in 0..TOTAL_IDS {
                    black_box(generator.next_id().unwrap());
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

fn bench_multi_thread(c: &mut Criterion, group_name: &str, mode: GeneratorMode) {
    let mut group = c.benchmark_group(group_name);
    let threads = num_cpus::get().clamp(2, 16);
    group.throughput(Throughput::Elements((TOTAL_IDS * threads) as u64));

    group.bench_function(format!("threads/{threads}/elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = core::time::Duration::ZERO;
            for _ in 0..iters {
                let generator = generator(mode);
                let barrier = Arc::new(Barrier::new(threads + 1));
                let start = scope(|s| {
                    for _ in 0..threads {
                        let barrier = Arc::clone(&barrier);
                        let generator = &generator;
                        s.spawn(move || {
                            barrier.wait();
                            for _ in 0..TOTAL_IDS {
                                black_box(generator.next_id().unwrap());
                            }
                        });
                    }
                    barrier.wait();
                    Instant::now()
                });
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let layout = IdLayout::DEFAULT;
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("combine_decompose/elems/{TOTAL_IDS}"), |b| {
        b.iter(|| {
            for seq in 0..TOTAL_IDS as u64 {
                let id = layout.combine(black_box(5), black_box(100), seq).unwrap();
                black_box(layout.decompose(id));
            }
        });
    });

    group.finish();
}

fn benchmarks(c: &mut Criterion) {
    bench_codec(c);
    bench_single_thread(c, "synchronous/single", GeneratorMode::Synchronous);
    bench_single_thread(c, "buffered/single", GeneratorMode::Buffered);
    bench_multi_thread(c, "synchronous/multi", GeneratorMode::Synchronous);
    bench_multi_thread(c, "buffered/multi", GeneratorMode::Buffered);
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
