//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These benchmarks measure the pure paths every operation goes through
//! before the first store call: name validation, physical naming, template
//! scoping, and lease acquire/release.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use futures::executor::block_on;
use index_lifecycle::clock::{Clock, SimulatedClock, Timestamp};
use index_lifecycle::lock::{LeaseStore, MemoryLeaseStore, OperationKind};
use index_lifecycle::naming::{physical_name, LogicalName};
use index_lifecycle::template::Template;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Benchmark LogicalName::parse - runs on every request
fn bench_parse_name(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_name");
    group.throughput(Throughput::Elements(1));

    for name_len in [8, 64, 230] {
        let name: String = (0..name_len)
            .map(|i| ((i % 26) as u8 + b'a') as char)
            .collect();

        group.bench_function(format!("name_len_{}", name_len), |b| {
            b.iter(|| LogicalName::parse(black_box(&name)))
        });
    }

    group.bench_function("mixed_case", |b| {
        b.iter(|| LogicalName::parse(black_box("  Orders-EU-West  ")))
    });

    group.bench_function("rejected", |b| {
        b.iter(|| LogicalName::parse(black_box("_orders*")))
    });

    group.finish();
}

/// Benchmark physical_name - timestamp formatting
fn bench_physical_name(c: &mut Criterion) {
    let mut group = c.benchmark_group("physical_name");
    group.throughput(Throughput::Elements(1));

    let name = LogicalName::parse("orders").unwrap();
    let at = Timestamp::from_millis(1_519_905_600_000);

    group.bench_function("orders", |b| {
        b.iter(|| physical_name(black_box(&name), black_box(at)))
    });

    group.finish();
}

/// Benchmark Template::parse - shape checks and pattern scoping
fn bench_template_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_parse");
    group.throughput(Throughput::Elements(1));

    let name = LogicalName::parse("orders").unwrap();
    let small = json!({ "settings": { "number_of_shards": 1 } });
    let large = json!({
        "settings": { "number_of_shards": 3, "number_of_replicas": 1 },
        "mappings": {
            "properties": (0..50)
                .map(|i| (format!("field_{}", i), json!({ "type": "keyword" })))
                .collect::<serde_json::Map<_, _>>()
        }
    });

    group.bench_function("small", |b| {
        b.iter(|| Template::parse(black_box(&name), Some(small.clone())))
    });
    group.bench_function("fifty_fields", |b| {
        b.iter(|| Template::parse(black_box(&name), Some(large.clone())))
    });

    group.finish();
}

/// Benchmark MemoryLeaseStore save + delete - the lock around every operation
fn bench_lease_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lease_cycle");
    group.throughput(Throughput::Elements(1));

    let clock: Arc<dyn Clock> = Arc::new(SimulatedClock::new(0));
    let store = MemoryLeaseStore::new(clock);
    let timeout = Duration::from_secs(600);

    group.bench_function("uncontended", |b| {
        b.iter(|| {
            block_on(async {
                let lease = store
                    .save(OperationKind::Creation, black_box("orders"), timeout)
                    .await
                    .unwrap();
                store.delete(&lease).await.unwrap();
            })
        })
    });

    block_on(store.save(OperationKind::Update, "orders", timeout)).unwrap();
    group.bench_function("locked", |b| {
        b.iter(|| block_on(store.save(OperationKind::Creation, black_box("orders"), timeout)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_name,
    bench_physical_name,
    bench_template_parse,
    bench_lease_cycle,
);

criterion_main!(benches);
