//! Column store registry and query driver.
//!
//! The [`ColumnStore`] owns one append tree per series behind a single
//! table lock. Registry mutations (column creation, close) and write
//! routing are serialized by that lock; writers for distinct series escape
//! it through the per-session handle cache (see [`crate::session`]), and
//! queries hold it only while opening per-series iterators.
//!
//! ```text
//! writer ──▶ Session cache ──▶ SeriesTree.append
//!                │ miss
//!                ▼
//!          ColumnStore.write ──(table lock)──▶ SeriesTree.append
//!
//! querier ──▶ ColumnStore.query ──▶ RowIterator ──▶ RowConsumer.put
//! ```

use crate::block::{BlockStore, LogicAddr};
use crate::error::{Result, StoreError};
use crate::model::{Payload, Sample, SeriesId};
use crate::query::{OrderBy, ReshapeRequest, RowConsumer};
use crate::tree::{AppendOutcome, RangeIterator, ReadChunk, SeriesTree, TreeConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, trace};

/// Samples fetched from the row iterator per driver batch.
pub const QUERY_BATCH_SIZE: usize = 4096;

/// Composition of per-series iterators into one row stream.
///
/// Only the chain variant is implemented; a time-ordered k-way merge is a
/// recognized extension point.
enum RowIterator {
    Chain(ChainIterator),
    TimeMerge,
}

impl RowIterator {
    fn read(&mut self, dest: &mut [Sample]) -> Result<ReadChunk> {
        match self {
            RowIterator::Chain(chain) => chain.read(dest),
            RowIterator::TimeMerge => {
                Err(StoreError::NotImplemented("order-by-time row iteration"))
            }
        }
    }
}

/// Consumes per-series iterators in the order supplied, tagging every
/// sample with the id its iterator was opened for.
struct ChainIterator {
    ids: Vec<SeriesId>,
    iters: Vec<RangeIterator>,
    pos: usize,
}

impl ChainIterator {
    fn new(ids: Vec<SeriesId>, iters: Vec<RangeIterator>) -> Self {
        debug_assert_eq!(ids.len(), iters.len());
        Self {
            ids,
            iters,
            pos: 0,
        }
    }

    fn read(&mut self, dest: &mut [Sample]) -> Result<ReadChunk> {
        let cap = dest.len();
        let mut ts = vec![0u64; cap];
        let mut values = vec![0f64; cap];
        let mut acc = 0;
        while self.pos < self.iters.len() {
            let id = self.ids[self.pos];
            let chunk = self.iters[self.pos].read(&mut ts[acc..], &mut values[acc..])?;
            for i in acc..acc + chunk.len() {
                dest[i] = Sample::float(id, ts[i], values[i]);
            }
            acc += chunk.len();
            if acc == cap {
                return Ok(ReadChunk::More(acc));
            }
            if chunk.is_done() {
                self.pos += 1;
            }
        }
        Ok(ReadChunk::Done(acc))
    }
}

/// Concurrency-safe registry mapping series ids to their append trees.
///
/// Trees are shared-owned: the registry keeps them alive for the life of
/// the database, and session caches hold additional handles. Two threads
/// never mutate the same tree concurrently without serialization (the tree
/// guarantees that internally), while writes to distinct series proceed in
/// parallel through cached handles.
pub struct ColumnStore {
    store: Arc<dyn BlockStore>,
    config: TreeConfig,
    columns: Mutex<HashMap<SeriesId, Arc<SeriesTree>>>,
}

impl ColumnStore {
    /// Creates a registry over `store` with the default tree geometry.
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self::with_config(store, TreeConfig::default())
    }

    /// Creates a registry with an explicit tree geometry.
    pub fn with_config(store: Arc<dyn BlockStore>, config: TreeConfig) -> Self {
        Self {
            store,
            config,
            columns: Mutex::new(HashMap::new()),
        }
    }

    fn lock_columns(&self) -> MutexGuard<'_, HashMap<SeriesId, Arc<SeriesTree>>> {
        self.columns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new series and force-initializes its tree.
    ///
    /// # Errors
    ///
    /// `SeriesExists` if the id is already registered. The check and the
    /// insert are atomic under the table lock.
    pub fn create_new_column(&self, id: SeriesId) -> Result<()> {
        let tree = Arc::new(SeriesTree::new(
            id,
            Arc::clone(&self.store),
            self.config.clone(),
        ));
        {
            let mut columns = self.lock_columns();
            if columns.contains_key(&id) {
                return Err(StoreError::SeriesExists(id));
            }
            columns.insert(id, Arc::clone(&tree));
        }
        tree.force_init();
        Ok(())
    }

    /// Registers a series reconstructed from a persisted root set, as
    /// returned by a previous [`ColumnStore::close`] or collected from
    /// rescue points.
    ///
    /// # Errors
    ///
    /// `SeriesExists` for a duplicate id; recovery errors from
    /// [`SeriesTree::open`] otherwise.
    pub fn restore_column(&self, id: SeriesId, roots: &[LogicAddr]) -> Result<()> {
        let tree = Arc::new(SeriesTree::open(
            id,
            roots,
            Arc::clone(&self.store),
            self.config.clone(),
        )?);
        let mut columns = self.lock_columns();
        if columns.contains_key(&id) {
            return Err(StoreError::SeriesExists(id));
        }
        columns.insert(id, tree);
        Ok(())
    }

    /// Routes one sample to its series tree.
    ///
    /// The lookup and the append both happen under the table lock: the
    /// mapping must not be rehashed underneath the destination tree. On
    /// [`AppendOutcome::FlushNeeded`] the tree's current roots are written
    /// into `rescue_points` for external persistence. When a session cache
    /// is supplied it learns the tree handle, so subsequent writes for the
    /// same id bypass this path entirely.
    ///
    /// # Errors
    ///
    /// `BadValue` for non-float payloads, `SeriesNotFound` for unknown
    /// ids, append errors from the tree otherwise.
    pub fn write(
        &self,
        sample: &Sample,
        rescue_points: &mut Vec<LogicAddr>,
        cache: Option<&mut HashMap<SeriesId, Arc<SeriesTree>>>,
    ) -> Result<AppendOutcome> {
        let value = match sample.payload {
            Payload::Float(v) => v,
            _ => return Err(StoreError::BadValue),
        };
        let columns = self.lock_columns();
        let tree = columns
            .get(&sample.series)
            .ok_or(StoreError::SeriesNotFound(sample.series))?;
        let outcome = tree.append(sample.timestamp, value)?;
        if outcome == AppendOutcome::FlushNeeded {
            *rescue_points = tree.get_roots();
        }
        if let Some(cache) = cache {
            cache.insert(sample.series, Arc::clone(tree));
        }
        Ok(outcome)
    }

    /// Runs a query and pumps its row stream into `consumer`.
    ///
    /// Missing series are reported as `SeriesNotFound` and skipped; the
    /// remaining ids still stream. Any iteration error, a group-by
    /// mismatch (`GroupByMismatch`), or an unsupported ordering
    /// (`NotImplemented`) ends the query via
    /// [`RowConsumer::set_error`]. A `false` from [`RowConsumer::put`]
    /// stops delivery immediately without error.
    ///
    /// With group-by enabled this engine validates membership and drops
    /// the samples; the grouped emission is the consumer's job.
    pub fn query(&self, request: &ReshapeRequest, consumer: &mut dyn RowConsumer) {
        trace!(request = %request, "column-store query");
        let mut ids = Vec::with_capacity(request.select.ids.len());
        let mut iters = Vec::with_capacity(request.select.ids.len());
        for &id in &request.select.ids {
            let columns = self.lock_columns();
            if let Some(tree) = columns.get(&id) {
                ids.push(id);
                iters.push(tree.search(request.select.begin, request.select.end));
            } else {
                drop(columns);
                error!(series = id, "queried series not found");
                consumer.set_error(StoreError::SeriesNotFound(id));
            }
        }

        let mut iter = match request.order_by {
            OrderBy::Series => RowIterator::Chain(ChainIterator::new(ids, iters)),
            OrderBy::Time => {
                error!("order-by-time is not implemented");
                RowIterator::TimeMerge
            }
        };

        let mut dest = vec![Sample::default(); QUERY_BATCH_SIZE];
        loop {
            let chunk = match iter.read(&mut dest) {
                Ok(chunk) => chunk,
                Err(err) => {
                    error!(error = %err, "query iteration failed");
                    consumer.set_error(err);
                    return;
                }
            };
            let produced = &dest[..chunk.len()];
            if request.group_by.enabled {
                // Validation only: grouped emission is delegated to the
                // consumer, matching the engine's observable contract.
                for sample in produced {
                    if !request.group_by.transient_map.contains_key(&sample.series) {
                        error!(series = sample.series, "unexpected series in group-by");
                        consumer.set_error(StoreError::GroupByMismatch(sample.series));
                        return;
                    }
                }
            } else {
                for sample in produced {
                    if !consumer.put(sample.clone()) {
                        return;
                    }
                }
            }
            if chunk.is_done() {
                return;
            }
        }
    }

    /// Closes every tree and returns the root sets of those that closed
    /// successfully; failures are logged and omitted from the map.
    pub fn close(&self) -> BTreeMap<SeriesId, Vec<LogicAddr>> {
        let columns = self.lock_columns();
        info!("column-store commit started");
        let mut result = BTreeMap::new();
        for (&id, tree) in columns.iter() {
            match tree.close() {
                Ok(roots) => {
                    result.insert(id, roots);
                }
                Err(err) => {
                    error!(series = id, error = %err, "failed to close series tree");
                }
            }
        }
        info!("column-store commit completed");
        result
    }

    /// Total bytes buffered across all trees, read under the table lock.
    pub fn uncommitted_memory(&self) -> usize {
        let columns = self.lock_columns();
        columns.values().map(|tree| tree.uncommitted_size()).sum()
    }
}
