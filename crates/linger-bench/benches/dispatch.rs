//! Dispatch benchmarks for Linger.
//!
//! These benchmarks measure registration and one-shot delivery costs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tenvis_linger_bench::{fill_broadcast, registry_with_channels};
use tenvis_linger_core::{ChannelOptions, Dispatcher, Payload};

/// Benchmark listener registration.
fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("register");

    group.bench_function("broadcast", |b| {
        b.iter_batched(
            || Dispatcher::new("/bench"),
            |dispatcher| {
                for _ in 0..100 {
                    let _ = dispatcher.register_broadcast(|_| {});
                }
                dispatcher
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function("for_id_supersede", |b| {
        let dispatcher = Dispatcher::new("/bench/:id");
        b.iter(|| dispatcher.register_for_id(black_box("u1"), |_| {}));
    });

    group.finish();
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let payload = Payload::new(json!({"type": "update", "text": "Hello"}));

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let registry = registry_with_channels(1);
            b.iter(|| {
                fill_broadcast(&registry, "/bench/0", size);
                registry.publish("/bench/0", black_box(payload.clone()))
            });
        });
    }

    group.finish();
}

/// Benchmark targeted delivery among many waiting subscribers.
fn bench_publish_to_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_to_id");

    group.bench_function("1000_waiting", |b| {
        let dispatcher = Dispatcher::with_options("/bench/:id", ChannelOptions::default());
        for i in 0..1000 {
            dispatcher.register_for_id(format!("user-{}", i), |_| {});
        }
        let payload = Payload::from("private");
        let mut i = 0u64;

        b.iter(|| {
            let id = format!("user-{}", i % 1000);
            i += 1;
            let delivered = dispatcher.fire_for_id(black_box(&id), &payload);
            dispatcher.register_for_id(id, |_| {});
            delivered
        });
    });

    group.finish();
}

/// Benchmark channel lookup across many channels.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let registry = registry_with_channels(1000);

    group.bench_function("channel_exists", |b| {
        let mut i = 0;
        b.iter(|| {
            let channel = format!("/bench/{}", i % 1000);
            i += 1;
            registry.channel_exists(black_box(&channel))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_register,
    bench_fanout,
    bench_publish_to_id,
    bench_lookup,
);
criterion_main!(benches);
