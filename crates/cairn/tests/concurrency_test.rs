//! Concurrency integration tests: parallel writers over distinct and
//! shared series, and drain-then-recover over the full data set.

use cairn::{
    ColumnStore, MemBlockStore, ReshapeRequest, RowConsumer, Sample, Session, StoreError,
    TreeConfig,
};
use std::sync::Arc;
use std::thread;

struct CountingConsumer {
    count: usize,
    last_ts: Option<u64>,
    ordered: bool,
    errors: Vec<StoreError>,
}

impl CountingConsumer {
    fn new() -> Self {
        Self {
            count: 0,
            last_ts: None,
            ordered: true,
            errors: Vec::new(),
        }
    }
}

impl RowConsumer for CountingConsumer {
    fn put(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.last_ts {
            if sample.timestamp < last {
                self.ordered = false;
            }
        }
        self.last_ts = Some(sample.timestamp);
        self.count += 1;
        true
    }

    fn set_error(&mut self, error: StoreError) {
        self.errors.push(error);
    }
}

fn count_series(registry: &ColumnStore, id: u64) -> CountingConsumer {
    let mut consumer = CountingConsumer::new();
    registry.query(
        &ReshapeRequest::series_scan(vec![id], 0, u64::MAX),
        &mut consumer,
    );
    assert!(consumer.errors.is_empty());
    consumer
}

#[test]
fn test_concurrent_writers_on_distinct_series() {
    const WRITERS: u64 = 4;
    const WRITES_PER_THREAD: u64 = 5_000;

    let store = Arc::new(MemBlockStore::new());
    let registry = Arc::new(ColumnStore::with_config(
        store.clone(),
        TreeConfig::default().with_leaf_capacity(64).with_fan_out(8),
    ));
    for id in 1..=WRITERS {
        registry.create_new_column(id).unwrap();
    }

    let handles: Vec<_> = (1..=WRITERS)
        .map(|id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut session = Session::new(registry);
                let mut rescue = Vec::new();
                for i in 0..WRITES_PER_THREAD {
                    session
                        .write(&Sample::float(id, i, i as f64), &mut rescue)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every append committed, per series, in timestamp order.
    for id in 1..=WRITERS {
        let consumer = count_series(&registry, id);
        assert_eq!(consumer.count, WRITES_PER_THREAD as usize);
        assert!(consumer.ordered);
    }

    // Drain everything, then rebuild from the returned root sets.
    let roots = registry.close();
    assert_eq!(registry.uncommitted_memory(), 0);
    assert_eq!(roots.len(), WRITERS as usize);

    let recovered = ColumnStore::with_config(
        store,
        TreeConfig::default().with_leaf_capacity(64).with_fan_out(8),
    );
    let mut total = 0;
    for (&id, root_set) in &roots {
        recovered.restore_column(id, root_set).unwrap();
        total += count_series(&recovered, id).count;
    }
    assert_eq!(total, (WRITERS * WRITES_PER_THREAD) as usize);
}

#[test]
fn test_concurrent_writers_on_one_series() {
    const WRITERS: u64 = 2;
    const WRITES_PER_THREAD: u64 = 2_000;

    let store = Arc::new(MemBlockStore::new());
    let registry = Arc::new(ColumnStore::with_config(
        store,
        TreeConfig::default().with_leaf_capacity(32).with_fan_out(8),
    ));
    registry.create_new_column(1).unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut session = Session::new(registry);
                let mut rescue = Vec::new();
                for i in 0..WRITES_PER_THREAD {
                    let ts = w * WRITES_PER_THREAD + i;
                    session
                        .write(&Sample::float(1, ts, ts as f64), &mut rescue)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Appends into one tree serialize but never get lost.
    let consumer = count_series(&registry, 1);
    assert_eq!(consumer.count, (WRITERS * WRITES_PER_THREAD) as usize);
}

#[test]
fn test_writers_and_readers_interleave() {
    let store = Arc::new(MemBlockStore::new());
    let registry = Arc::new(ColumnStore::with_config(
        store,
        TreeConfig::default().with_leaf_capacity(16).with_fan_out(4),
    ));
    registry.create_new_column(1).unwrap();

    let writer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let mut session = Session::new(registry);
            let mut rescue = Vec::new();
            for i in 0..3_000u64 {
                session
                    .write(&Sample::float(1, i, i as f64), &mut rescue)
                    .unwrap();
            }
        })
    };

    // Concurrent scans must always observe a consistent, ordered prefix.
    for _ in 0..20 {
        let consumer = count_series(&registry, 1);
        assert!(consumer.ordered);
        assert!(consumer.count <= 3_000);
    }
    writer.join().unwrap();

    let consumer = count_series(&registry, 1);
    assert_eq!(consumer.count, 3_000);
    assert!(consumer.ordered);
}
