//! Per-series append tree.
//!
//! One [`SeriesTree`] owns all data of a single series. Samples accumulate
//! in a level-0 in-memory buffer; when the buffer reaches its capacity it is
//! sealed into an immutable leaf block, and leaf addresses aggregate into
//! inner blocks with a fixed fan-out, cascading upward:
//!
//! ```text
//!                       level 2   [inner]──prev──▶[inner]
//!                                   │ fan_out children
//!            level 1   [inner]──prev──▶[inner]──prev──▶[inner]
//!                        │ fan_out children
//!  level 0   [leaf]──prev──▶[leaf]──prev──▶ ... ──▶[leaf]   + write buffer
//! ```
//!
//! Every sealed node backlinks its predecessor at the same level. The
//! newest sealed address per level is the tree's root set ("rescue
//! points"): persisting it externally is sufficient to reopen the tree
//! after a crash, because the leaf chain alone reaches every sealed sample
//! and the inner chains let [`SeriesTree::open`] rebuild the leaf index
//! without touching most leaves.
//!
//! Node state machine: a buffer is filling, a seal makes it an immutable
//! block, and a later parent seal links it. Transitions are one-way; sealed
//! blocks are shared freely with readers.

use crate::block::{BlockStore, LogicAddr};
use crate::error::{Result, StoreError};
use crate::model::{SeriesId, Timestamp};
use std::mem;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub(crate) mod codec;
pub(crate) mod node;

mod iter;

pub use iter::{RangeIterator, ReadChunk};

use node::ChildEntry;

/// Default number of samples buffered before a leaf is sealed.
///
/// Sized so that a worst-case encoded leaf (145 bits per sample, see the
/// codec) plus the node header fits a default 4 KiB block with headroom.
pub const DEFAULT_LEAF_CAPACITY: usize = 192;

/// Default number of children aggregated into one inner node.
pub const DEFAULT_FAN_OUT: usize = 32;

/// Configuration of an append tree's geometry.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Samples buffered before a leaf seals. Must be sized so the encoded
    /// leaf fits one block of the backing store.
    pub leaf_capacity: usize,
    /// Children per inner node.
    pub fan_out: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            fan_out: DEFAULT_FAN_OUT,
        }
    }
}

impl TreeConfig {
    /// Returns the configuration with a custom leaf capacity.
    pub fn with_leaf_capacity(mut self, leaf_capacity: usize) -> Self {
        self.leaf_capacity = leaf_capacity;
        self
    }

    /// Returns the configuration with a custom fan-out.
    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The sample was buffered; no node was sealed.
    Appended,
    /// At least one node was sealed. The caller must read
    /// [`SeriesTree::get_roots`] and persist it to keep the recovery
    /// guarantee.
    FlushNeeded,
}

struct InnerLevel {
    /// Entries of sealed nodes one level down, waiting to be linked.
    children: Vec<ChildEntry>,
    /// Address of the newest sealed node at this bucket's own level.
    last_sealed: Option<LogicAddr>,
}

impl InnerLevel {
    fn new() -> Self {
        Self {
            children: Vec::new(),
            last_sealed: None,
        }
    }
}

struct TreeState {
    initialized: bool,
    buffer: Vec<(Timestamp, f64)>,
    leaf_prev: Option<LogicAddr>,
    /// Flat index of every sealed leaf, in seal order.
    leaf_index: Vec<ChildEntry>,
    /// `inners[i]` buffers entries of level-`i` nodes and seals level-`i+1`
    /// nodes; its `last_sealed` is the newest level-`i+1` address.
    inners: Vec<InnerLevel>,
    closed: Option<Vec<LogicAddr>>,
}

impl TreeState {
    fn empty(initialized: bool) -> Self {
        Self {
            initialized,
            buffer: Vec::new(),
            leaf_prev: None,
            leaf_index: Vec::new(),
            inners: Vec::new(),
            closed: None,
        }
    }

    fn roots(&self) -> Vec<LogicAddr> {
        let mut roots = Vec::new();
        match self.leaf_prev {
            Some(addr) => roots.push(addr),
            None => return roots,
        }
        for level in &self.inners {
            match level.last_sealed {
                Some(addr) => roots.push(addr),
                None => break,
            }
        }
        roots
    }
}

/// Append-only tree holding all samples of one series.
///
/// Appends are internally serialized by a per-tree mutex; trees of distinct
/// series share nothing, so they can be written concurrently. Iterators
/// returned by [`SeriesTree::search`] observe a snapshot taken at creation
/// and never hold the tree lock while streaming.
pub struct SeriesTree {
    series: SeriesId,
    store: Arc<dyn BlockStore>,
    config: TreeConfig,
    state: Mutex<TreeState>,
}

impl SeriesTree {
    /// Creates a new, uninitialized tree for `series`.
    ///
    /// The level-0 buffer is materialized by [`SeriesTree::force_init`] (or
    /// lazily by the first append).
    pub fn new(series: SeriesId, store: Arc<dyn BlockStore>, config: TreeConfig) -> Self {
        Self {
            series,
            store,
            config,
            state: Mutex::new(TreeState::empty(false)),
        }
    }

    /// Reopens a tree from a persisted root set.
    ///
    /// `roots[k]` must be the newest sealed address at level `k`, as
    /// returned by [`SeriesTree::get_roots`] or [`SeriesTree::close`]. The
    /// sealed-leaf index is rebuilt from the inner chains, then the
    /// unlinked tail of each level is recovered through its prev-links.
    ///
    /// # Errors
    ///
    /// Fails if any chained block is missing, corrupt, or belongs to a
    /// different series.
    pub fn open(
        series: SeriesId,
        roots: &[LogicAddr],
        store: Arc<dyn BlockStore>,
        config: TreeConfig,
    ) -> Result<Self> {
        if roots.is_empty() {
            let tree = Self::new(series, store, config);
            tree.force_init();
            return Ok(tree);
        }
        let top = roots.len() - 1;

        // Inner chains, oldest node first. chains[k - 1] holds level k.
        let mut chains: Vec<Vec<(LogicAddr, node::NodeHeader, Vec<ChildEntry>)>> = Vec::new();
        for (k, &root) in roots.iter().enumerate().skip(1) {
            let mut blocks = Vec::new();
            let mut cursor = Some(root);
            while let Some(addr) = cursor {
                let block = store.read_block(addr)?;
                let (header, children) = node::decode_inner(&block)?;
                if header.series != series || header.level as usize != k {
                    return Err(StoreError::Decode(format!(
                        "inner node at {} does not belong to series {} level {}",
                        addr, series, k
                    )));
                }
                cursor = header.prev;
                blocks.push((addr, header, children));
            }
            blocks.reverse();
            chains.push(blocks);
        }

        // Leaves linked through level-1 nodes, in seal order.
        let mut leaf_index: Vec<ChildEntry> = chains
            .first()
            .map(|chain| {
                chain
                    .iter()
                    .flat_map(|(_, _, children)| children.iter().copied())
                    .collect()
            })
            .unwrap_or_default();
        let covered: std::collections::HashSet<LogicAddr> =
            leaf_index.iter().map(|e| e.addr).collect();

        // Unlinked leaf tail, via the leaf prev-chain.
        let mut tail = Vec::new();
        let mut cursor = Some(roots[0]);
        while let Some(addr) = cursor {
            if covered.contains(&addr) {
                break;
            }
            let block = store.read_block(addr)?;
            let header = node::decode_header(&block)?;
            if header.kind != node::NodeKind::Leaf || header.series != series {
                return Err(StoreError::Decode(format!(
                    "leaf chain at {} does not belong to series {}",
                    addr, series
                )));
            }
            tail.push(ChildEntry {
                addr,
                min_ts: header.min_ts,
                max_ts: header.max_ts,
                count: header.count,
            });
            cursor = header.prev;
        }
        tail.reverse();
        leaf_index.extend(tail.iter().copied());

        // Re-prime per-level buckets: the unlinked suffix of each level
        // becomes pending children again so future seals pick it up.
        let mut inners = Vec::new();
        inners.push(InnerLevel {
            children: tail,
            last_sealed: roots.get(1).copied(),
        });
        for k in 1..=top {
            let covered: std::collections::HashSet<LogicAddr> = chains
                .get(k)
                .map(|chain| {
                    chain
                        .iter()
                        .flat_map(|(_, _, children)| children.iter().map(|e| e.addr))
                        .collect()
                })
                .unwrap_or_default();
            let pending = chains[k - 1]
                .iter()
                .filter(|(addr, _, _)| !covered.contains(addr))
                .map(|(addr, header, children)| ChildEntry {
                    addr: *addr,
                    min_ts: header.min_ts,
                    max_ts: header.max_ts,
                    count: children.iter().fold(0u32, |a, c| a.saturating_add(c.count)),
                })
                .collect();
            inners.push(InnerLevel {
                children: pending,
                last_sealed: roots.get(k + 1).copied(),
            });
        }

        let state = TreeState {
            initialized: true,
            buffer: Vec::new(),
            leaf_prev: Some(roots[0]),
            leaf_index,
            inners,
            closed: None,
        };
        Ok(Self {
            series,
            store,
            config,
            state: Mutex::new(state),
        })
    }

    /// Id of the series this tree stores.
    pub fn series(&self) -> SeriesId {
        self.series
    }

    /// Materializes the level-0 buffer of a newly created tree.
    pub fn force_init(&self) {
        let mut state = self.lock();
        if !state.initialized {
            state.initialized = true;
            let capacity = self.config.leaf_capacity;
            state.buffer.reserve(capacity);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends one sample.
    ///
    /// Returns [`AppendOutcome::FlushNeeded`] when the append sealed at
    /// least one node; the caller must then persist
    /// [`SeriesTree::get_roots`] to keep the recovery guarantee.
    ///
    /// # Errors
    ///
    /// `BadValue` for non-finite values, `SeriesClosed` after
    /// [`SeriesTree::close`], `IoError` if sealing the leaf failed — the
    /// triggering sample is then not committed and the append may be
    /// retried with the same arguments.
    pub fn append(&self, timestamp: Timestamp, value: f64) -> Result<AppendOutcome> {
        if !value.is_finite() {
            return Err(StoreError::BadValue);
        }
        let mut state = self.lock();
        if state.closed.is_some() {
            return Err(StoreError::SeriesClosed(self.series));
        }
        if !state.initialized {
            state.initialized = true;
        }
        state.buffer.push((timestamp, value));
        if state.buffer.len() < self.config.leaf_capacity {
            return Ok(AppendOutcome::Appended);
        }
        match self.seal_leaf(&mut state) {
            Ok(()) => {
                self.cascade(&mut state);
                Ok(AppendOutcome::FlushNeeded)
            }
            Err(err) => {
                state.buffer.pop();
                Err(err)
            }
        }
    }

    /// Seals the level-0 buffer into a leaf block.
    fn seal_leaf(&self, state: &mut TreeState) -> Result<()> {
        let bytes = node::encode_leaf(self.series, state.leaf_prev, &state.buffer);
        let addr = self.store.append_block(&bytes)?;
        let (mut min_ts, mut max_ts) = (Timestamp::MAX, Timestamp::MIN);
        for &(ts, _) in &state.buffer {
            min_ts = min_ts.min(ts);
            max_ts = max_ts.max(ts);
        }
        let entry = ChildEntry {
            addr,
            min_ts,
            max_ts,
            count: state.buffer.len() as u32,
        };
        debug!(
            series = self.series,
            addr,
            count = entry.count,
            "sealed leaf node"
        );
        state.leaf_prev = Some(addr);
        state.leaf_index.push(entry);
        if state.inners.is_empty() {
            state.inners.push(InnerLevel::new());
        }
        state.inners[0].children.push(entry);
        state.buffer.clear();
        Ok(())
    }

    /// Seals full inner levels bottom-up.
    ///
    /// An I/O failure here is deferred rather than surfaced: the sealed
    /// leaf already committed the data and its prev-chain keeps it
    /// recoverable, so the children stay buffered and the seal is retried
    /// at the next cascade point.
    fn cascade(&self, state: &mut TreeState) {
        let mut level = 0;
        while level < state.inners.len() {
            if state.inners[level].children.len() < self.config.fan_out {
                break;
            }
            match self.seal_inner(state, level, self.config.fan_out) {
                Ok(()) => level += 1,
                Err(err) => {
                    warn!(
                        series = self.series,
                        level,
                        error = %err,
                        "deferred inner node seal"
                    );
                    break;
                }
            }
        }
    }

    /// Seals up to `take` buffered children of `state.inners[level]` into
    /// one level-`level + 1` node.
    fn seal_inner(&self, state: &mut TreeState, level: usize, take: usize) -> Result<()> {
        let take = take.min(state.inners[level].children.len());
        let prev = state.inners[level].last_sealed;
        let batch = &state.inners[level].children[..take];
        let bytes = node::encode_inner(self.series, (level + 1) as u16, prev, batch);
        let addr = self.store.append_block(&bytes)?;
        let entry = ChildEntry {
            addr,
            min_ts: batch.iter().map(|c| c.min_ts).min().unwrap_or(0),
            max_ts: batch.iter().map(|c| c.max_ts).max().unwrap_or(0),
            count: batch.iter().fold(0u32, |a, c| a.saturating_add(c.count)),
        };
        debug!(
            series = self.series,
            addr,
            level = level + 1,
            children = take,
            "sealed inner node"
        );
        state.inners[level].last_sealed = Some(addr);
        state.inners[level].children.drain(..take);
        if state.inners.len() == level + 1 {
            state.inners.push(InnerLevel::new());
        }
        state.inners[level + 1].children.push(entry);
        Ok(())
    }

    /// Opens a range iterator over `[begin, end)`.
    ///
    /// Ascending by timestamp position when `begin <= end`, descending over
    /// the reverse window `(end, begin]` otherwise. The snapshot is taken
    /// under the tree lock without any I/O; streaming happens lock-free.
    pub fn search(&self, begin: Timestamp, end: Timestamp) -> RangeIterator {
        let ascending = begin <= end;
        let (mut leaves, mut buffered) = {
            let state = self.lock();
            let leaves: Vec<ChildEntry> = state
                .leaf_index
                .iter()
                .filter(|e| {
                    if ascending {
                        e.overlaps(begin, end)
                    } else {
                        e.overlaps_rev(begin, end)
                    }
                })
                .copied()
                .collect();
            let buffered: Vec<(Timestamp, f64)> = state
                .buffer
                .iter()
                .filter(|&&(ts, _)| {
                    if ascending {
                        begin <= ts && ts < end
                    } else {
                        end < ts && ts <= begin
                    }
                })
                .copied()
                .collect();
            (leaves, buffered)
        };
        if !ascending {
            leaves.reverse();
            buffered.reverse();
        }
        RangeIterator::new(
            Arc::clone(&self.store),
            self.series,
            begin,
            end,
            leaves,
            buffered,
        )
    }

    /// Current root set: the newest sealed address per level, leaf level
    /// first. Empty until the first seal. Cheap, pure read.
    pub fn get_roots(&self) -> Vec<LogicAddr> {
        let state = self.lock();
        match &state.closed {
            Some(roots) => roots.clone(),
            None => state.roots(),
        }
    }

    /// Seals every partial level, syncs the store and returns the final
    /// root set. Idempotent: subsequent calls return the same list.
    ///
    /// # Errors
    ///
    /// Propagates seal and sync failures; the tree stays open and close may
    /// be retried.
    pub fn close(&self) -> Result<Vec<LogicAddr>> {
        let mut state = self.lock();
        if let Some(roots) = &state.closed {
            return Ok(roots.clone());
        }
        if !state.buffer.is_empty() {
            self.seal_leaf(&mut state)?;
        }
        let mut level = 0;
        while level < state.inners.len() {
            let pending = state.inners[level].children.len();
            if pending == 0 {
                level += 1;
                continue;
            }
            // A single unlinked node at the top needs no parent: its own
            // address is already in the root set.
            let is_top = level + 1 == state.inners.len();
            if is_top && pending == 1 && state.inners[level].last_sealed.is_none() {
                break;
            }
            while !state.inners[level].children.is_empty() {
                self.seal_inner(&mut state, level, self.config.fan_out)?;
            }
            level += 1;
        }
        self.store.sync()?;
        let roots = state.roots();
        debug!(series = self.series, roots = roots.len(), "closed series tree");
        state.closed = Some(roots.clone());
        Ok(roots)
    }

    /// Bytes of buffered, not-yet-sealed samples.
    pub fn uncommitted_size(&self) -> usize {
        let state = self.lock();
        state.buffer.len() * mem::size_of::<(Timestamp, f64)>()
    }
}
