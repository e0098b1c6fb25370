#![allow(missing_docs, clippy::cast_possible_truncation)]

use contention::{
    BoundedQueue, Budget, Counter, CounterStrategy, CounterWorkload, QueueStrategy, QueueWorkload,
    WorkItem, WorkerHarness, bounded,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::{hint::black_box, sync::Arc, thread, time::Duration};
use tracing_subscriber::EnvFilter;

// Harness logs are quiet unless RUST_LOG asks for them.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Single-threaded latency benchmark - measures ns per operation
fn bench_latency(c: &mut Criterion) {
    init_tracing();
    let mut group = c.benchmark_group("latency_ns_per_op");
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));

    for strategy in CounterStrategy::ALL {
        let counter = strategy.build();
        group.bench_function(BenchmarkId::new("counter_increment", strategy), |b| {
            b.iter(|| counter.increment());
        });
        group.bench_function(BenchmarkId::new("counter_get", strategy), |b| {
            b.iter(|| black_box(counter.get()));
        });
    }

    for strategy in QueueStrategy::ALL {
        let queue = bounded::<u64>()
            .capacity(1024)
            .strategy(strategy)
            .build()
            .unwrap();
        group.bench_function(BenchmarkId::new("queue_put_take", strategy), |b| {
            b.iter(|| {
                queue.put(black_box(42)).unwrap();
                black_box(queue.take().unwrap());
            });
        });
    }

    group.finish();
}

/// Contended counter throughput, raw threads with no harness in between
fn bench_counter_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_contention");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for threads in [1, 2, 4, 8] {
        let ops_per_thread = 100_000 / threads;
        group.throughput(Throughput::Elements((threads * ops_per_thread) as u64));

        for strategy in CounterStrategy::ALL {
            group.bench_with_input(
                BenchmarkId::new(strategy.name(), format!("{threads}t")),
                &(threads, ops_per_thread),
                |b, &(threads, ops_per_thread)| {
                    b.iter(|| hammer_counter(strategy.build(), threads, ops_per_thread));
                },
            );
        }
    }

    group.finish();
}

fn hammer_counter(counter: Arc<dyn Counter>, threads: usize, ops_per_thread: usize) {
    thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                for _ in 0..ops_per_thread {
                    counter.increment();
                }
            });
        }
    });
    assert_eq!(counter.get(), (threads * ops_per_thread) as i64);
}

/// End-to-end throughput through the worker harness
fn bench_harness_throughput(c: &mut Criterion) {
    init_tracing();
    let mut group = c.benchmark_group("harness_throughput");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(15));
    group.warm_up_time(Duration::from_secs(3));

    // Test configurations: (producers, consumers, total_ops)
    let configs = [
        (1, 1, 100_000), // Single producer/consumer baseline
        (2, 2, 100_000), // Low contention
        (4, 4, 100_000), // Medium contention
        (8, 8, 100_000), // High contention
    ];

    for (producers, consumers, total_ops) in configs {
        let config_name = format!("{producers}p_{consumers}c");
        group.throughput(Throughput::Elements(total_ops));

        for strategy in QueueStrategy::ALL {
            group.bench_with_input(
                BenchmarkId::new(format!("queue_{strategy}"), &config_name),
                &(producers, consumers, total_ops),
                |b, &(producers, consumers, total_ops)| {
                    b.iter(|| run_queue(strategy, producers, consumers, total_ops));
                },
            );
        }

        for strategy in CounterStrategy::ALL {
            group.bench_with_input(
                BenchmarkId::new(format!("counter_{strategy}"), &config_name),
                &(producers, consumers, total_ops),
                |b, &(producers, consumers, total_ops)| {
                    b.iter(|| {
                        let workload = CounterWorkload::new(strategy.build());
                        let mut harness = WorkerHarness::new(workload);
                        harness
                            .start(producers, consumers, Budget::Operations(total_ops))
                            .unwrap();
                        black_box(harness.wait().unwrap());
                    });
                },
            );
        }
    }

    group.finish();
}

fn run_queue(strategy: QueueStrategy, producers: usize, consumers: usize, total_ops: u64) {
    let queue = bounded::<WorkItem<u64>>()
        .capacity(100)
        .strategy(strategy)
        .build()
        .unwrap();
    let mut harness = WorkerHarness::new(QueueWorkload::new(queue, |seq| seq));
    harness
        .start(producers, consumers, Budget::Operations(total_ops))
        .unwrap();
    let report = harness.wait().unwrap();
    assert_eq!(report.stats.consumed, total_ops);
}

criterion_group!(
    benches,
    bench_latency,
    bench_counter_contention,
    bench_harness_throughput
);

criterion_main!(benches);
