//! Benchmarks for cairn storage components.
//!
//! Run with: cargo bench --package cairn
//!
//! ## Benchmark Categories
//!
//! - **Append Tree**: buffered appends and seal cascades
//! - **Range Scan**: full and narrow scans over sealed data
//! - **Write Path**: session-cached writes through the registry

use cairn::{
    BlockStore, ColumnStore, MemBlockStore, ReshapeRequest, RowConsumer, Sample, SeriesTree,
    Session, StoreError, TreeConfig,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

/// Generate typical time series data (regular intervals, slowly varying
/// values).
fn generate_samples(count: usize) -> Vec<(u64, f64)> {
    let mut value = 50.0;
    (0..count)
        .map(|i| {
            value += (i as f64 * 0.1).sin() * 0.1;
            (1_000_000_000 + i as u64 * 1_000, value)
        })
        .collect()
}

struct NullConsumer {
    count: usize,
}

impl RowConsumer for NullConsumer {
    fn put(&mut self, sample: Sample) -> bool {
        black_box(&sample);
        self.count += 1;
        true
    }

    fn set_error(&mut self, _error: StoreError) {}
}

fn sealed_tree(samples: &[(u64, f64)]) -> SeriesTree {
    let store = Arc::new(MemBlockStore::new()) as Arc<dyn BlockStore>;
    let tree = SeriesTree::new(1, store, TreeConfig::default());
    tree.force_init();
    for &(ts, value) in samples {
        tree.append(ts, value).unwrap();
    }
    tree
}

fn bench_tree_append(c: &mut Criterion) {
    let samples = generate_samples(100_000);

    let mut group = c.benchmark_group("tree_append");
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("append_100k", |b| {
        b.iter(|| {
            let tree = sealed_tree(black_box(&samples));
            black_box(tree.get_roots())
        })
    });
    group.finish();
}

fn bench_full_scan(c: &mut Criterion) {
    let samples = generate_samples(100_000);
    let tree = sealed_tree(&samples);

    let mut group = c.benchmark_group("range_scan");
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("full_scan_100k", |b| {
        b.iter(|| {
            let scanned = tree.search(0, u64::MAX).collect_samples().unwrap();
            black_box(scanned.len())
        })
    });
    group.bench_function("narrow_scan_100k", |b| {
        b.iter(|| {
            let scanned = tree
                .search(1_000_000_000, 1_000_000_000 + 1_000_000)
                .collect_samples()
                .unwrap();
            black_box(scanned.len())
        })
    });
    group.finish();
}

fn bench_session_write_path(c: &mut Criterion) {
    let samples = generate_samples(10_000);

    c.bench_function("session_write_10k", |b| {
        b.iter(|| {
            let store = Arc::new(MemBlockStore::new());
            let registry = Arc::new(ColumnStore::new(store));
            registry.create_new_column(1).unwrap();
            let mut session = Session::new(registry);
            let mut rescue = Vec::new();
            for &(ts, value) in &samples {
                session
                    .write(&Sample::float(1, ts, value), &mut rescue)
                    .unwrap();
            }
            black_box(rescue.len())
        })
    });
}

fn bench_query_driver(c: &mut Criterion) {
    let samples = generate_samples(100_000);
    let store = Arc::new(MemBlockStore::new());
    let registry = Arc::new(ColumnStore::new(store));
    registry.create_new_column(1).unwrap();
    let mut session = Session::new(registry.clone());
    let mut rescue = Vec::new();
    for &(ts, value) in &samples {
        session
            .write(&Sample::float(1, ts, value), &mut rescue)
            .unwrap();
    }

    let mut group = c.benchmark_group("query_driver");
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("scan_100k", |b| {
        b.iter(|| {
            let mut consumer = NullConsumer { count: 0 };
            registry.query(
                &ReshapeRequest::series_scan(vec![1], 0, u64::MAX),
                &mut consumer,
            );
            black_box(consumer.count)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_tree_append,
    bench_full_scan,
    bench_session_write_path,
    bench_query_driver
);
criterion_main!(benches);
