//! Property tests for the append tree: whatever is appended comes back,
//! bit-exact and in order, across seal boundaries.

use cairn::{BlockStore, MemBlockStore, SeriesTree, TreeConfig};
use proptest::prelude::*;
use std::sync::Arc;

/// Nondecreasing timestamps with realistic, occasionally large deltas.
fn timestamp_strategy() -> impl Strategy<Value = Vec<u64>> {
    (
        0u64..1_000_000_000_000,
        prop::collection::vec(0u64..10_000_000, 1..200),
    )
        .prop_map(|(base, deltas)| {
            let mut current = base;
            deltas
                .into_iter()
                .map(|delta| {
                    current = current.saturating_add(delta);
                    current
                })
                .collect()
        })
}

/// Finite values covering sign changes, zeros and wide magnitudes.
fn value_strategy(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(
        prop_oneof![
            -1.0e12f64..1.0e12,
            Just(0.0),
            Just(-0.0),
            Just(f64::MIN_POSITIVE),
        ],
        len..=len,
    )
}

fn samples_strategy() -> impl Strategy<Value = Vec<(u64, f64)>> {
    timestamp_strategy().prop_flat_map(|timestamps| {
        let len = timestamps.len();
        value_strategy(len).prop_map(move |values| {
            timestamps.iter().copied().zip(values).collect()
        })
    })
}

fn build_tree(leaf_capacity: usize, samples: &[(u64, f64)]) -> SeriesTree {
    let store = Arc::new(MemBlockStore::new()) as Arc<dyn BlockStore>;
    let config = TreeConfig::default()
        .with_leaf_capacity(leaf_capacity)
        .with_fan_out(4);
    let tree = SeriesTree::new(1, store, config);
    tree.force_init();
    for &(ts, value) in samples {
        tree.append(ts, value).unwrap();
    }
    tree
}

proptest! {
    /// Full-range scans reproduce every appended sample bit-exact, in
    /// order, regardless of where the seal boundaries fall.
    #[test]
    fn test_append_scan_roundtrip(samples in samples_strategy()) {
        let tree = build_tree(7, &samples);
        let scanned = tree.search(0, u64::MAX).collect_samples().unwrap();

        prop_assert_eq!(scanned.len(), samples.len());
        for (expected, actual) in samples.iter().zip(scanned.iter()) {
            prop_assert_eq!(expected.0, actual.0);
            prop_assert_eq!(expected.1.to_bits(), actual.1.to_bits());
        }
    }

    /// Sub-range scans agree with a straight filter over the input.
    #[test]
    fn test_sub_range_scan_matches_filter(
        samples in samples_strategy(),
        cut in 0u64..1_000_000_000_000,
    ) {
        let tree = build_tree(5, &samples);
        let begin = samples[0].0.saturating_add(cut % 1000);
        let end = begin.saturating_add(cut);

        let scanned = tree.search(begin, end).collect_samples().unwrap();
        let expected: Vec<_> = samples
            .iter()
            .filter(|&&(ts, _)| begin <= ts && ts < end)
            .copied()
            .collect();

        prop_assert_eq!(scanned.len(), expected.len());
        for (e, a) in expected.iter().zip(scanned.iter()) {
            prop_assert_eq!(e.0, a.0);
            prop_assert_eq!(e.1.to_bits(), a.1.to_bits());
        }
    }

    /// Recovery from the root set reproduces everything that sealed.
    #[test]
    fn test_recovery_covers_sealed_prefix(samples in samples_strategy()) {
        let leaf_capacity = 4;
        let store = Arc::new(MemBlockStore::new());
        let config = TreeConfig::default()
            .with_leaf_capacity(leaf_capacity)
            .with_fan_out(2);
        let tree = SeriesTree::new(2, store.clone() as Arc<dyn BlockStore>, config.clone());
        tree.force_init();
        for &(ts, value) in &samples {
            tree.append(ts, value).unwrap();
        }

        let sealed = samples.len() - samples.len() % leaf_capacity;
        let roots = tree.get_roots();
        let reopened = SeriesTree::open(2, &roots, store as Arc<dyn BlockStore>, config).unwrap();
        let scanned = reopened.search(0, u64::MAX).collect_samples().unwrap();

        prop_assert_eq!(scanned.len(), sealed);
        for (e, a) in samples.iter().take(sealed).zip(scanned.iter()) {
            prop_assert_eq!(e.0, a.0);
            prop_assert_eq!(e.1.to_bits(), a.1.to_bits());
        }
    }
}
