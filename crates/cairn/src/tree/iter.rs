//! Range iteration over a snapshot of one series.

use crate::block::{BlockStore, LogicAddr};
use crate::error::{Result, StoreError};
use crate::model::{SeriesId, Timestamp};
use crate::tree::node::{self, ChildEntry};
use std::collections::VecDeque;
use std::sync::Arc;

/// Outcome of one batched iterator read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadChunk {
    /// The destination was filled; more data may follow.
    More(usize),
    /// The iterator is drained; the final count may be zero.
    Done(usize),
}

impl ReadChunk {
    /// Number of samples written by the read.
    pub fn len(&self) -> usize {
        match *self {
            ReadChunk::More(n) | ReadChunk::Done(n) => n,
        }
    }

    /// True if the iterator has no more data to produce.
    pub fn is_done(&self) -> bool {
        matches!(self, ReadChunk::Done(_))
    }
}

/// Streaming iterator over the samples of one series within a time window.
///
/// Created by a tree search: the constructor receives a snapshot of the
/// in-range sealed-leaf entries and buffered samples taken under the tree
/// lock, already arranged in emission order. Iteration itself performs block
/// reads without holding any tree lock, so appends may proceed concurrently;
/// samples sealed or buffered after the snapshot are not observed.
pub struct RangeIterator {
    store: Arc<dyn BlockStore>,
    series: SeriesId,
    begin: Timestamp,
    end: Timestamp,
    ascending: bool,
    leaves: VecDeque<ChildEntry>,
    buffered: VecDeque<(Timestamp, f64)>,
    pending: VecDeque<(Timestamp, f64)>,
    buffered_emitted: bool,
}

impl RangeIterator {
    pub(crate) fn new(
        store: Arc<dyn BlockStore>,
        series: SeriesId,
        begin: Timestamp,
        end: Timestamp,
        leaves: Vec<ChildEntry>,
        buffered: Vec<(Timestamp, f64)>,
    ) -> Self {
        Self {
            store,
            series,
            begin,
            end,
            ascending: begin <= end,
            leaves: leaves.into(),
            buffered: buffered.into(),
            pending: VecDeque::new(),
            buffered_emitted: false,
        }
    }

    /// Reads the sealed leaf behind `addr` and queues its in-window samples.
    fn load_leaf(&mut self, addr: LogicAddr) -> Result<()> {
        let block = self.store.read_block(addr)?;
        let (header, samples) = node::decode_leaf(&block)?;
        if header.series != self.series {
            return Err(StoreError::Decode(format!(
                "leaf at {} belongs to series {}, expected {}",
                addr, header.series, self.series
            )));
        }
        let (begin, end, ascending) = (self.begin, self.end, self.ascending);
        let keep = move |ts: Timestamp| {
            if ascending {
                begin <= ts && ts < end
            } else {
                end < ts && ts <= begin
            }
        };
        if ascending {
            self.pending
                .extend(samples.into_iter().filter(|&(ts, _)| keep(ts)));
        } else {
            self.pending
                .extend(samples.into_iter().rev().filter(|&(ts, _)| keep(ts)));
        }
        Ok(())
    }

    fn next_sample(&mut self) -> Result<Option<(Timestamp, f64)>> {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return Ok(Some(sample));
            }
            // Ascending scans emit sealed leaves before the buffered tail;
            // descending scans start from the buffered tail.
            if self.ascending {
                if let Some(entry) = self.leaves.pop_front() {
                    self.load_leaf(entry.addr)?;
                    continue;
                }
                if !self.buffered_emitted {
                    self.buffered_emitted = true;
                    self.pending = std::mem::take(&mut self.buffered);
                    continue;
                }
            } else {
                if !self.buffered_emitted {
                    self.buffered_emitted = true;
                    self.pending = std::mem::take(&mut self.buffered);
                    continue;
                }
                if let Some(entry) = self.leaves.pop_front() {
                    self.load_leaf(entry.addr)?;
                    continue;
                }
            }
            return Ok(None);
        }
    }

    /// Reads up to `min(ts_out.len(), val_out.len())` samples.
    ///
    /// Returns [`ReadChunk::More`] when the destination was filled and
    /// [`ReadChunk::Done`] once the snapshot is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates block-store and decode failures; the iterator should be
    /// dropped after an error.
    pub fn read(
        &mut self,
        ts_out: &mut [Timestamp],
        val_out: &mut [f64],
    ) -> Result<ReadChunk> {
        let cap = ts_out.len().min(val_out.len());
        let mut n = 0;
        while n < cap {
            match self.next_sample()? {
                Some((ts, value)) => {
                    ts_out[n] = ts;
                    val_out[n] = value;
                    n += 1;
                }
                None => return Ok(ReadChunk::Done(n)),
            }
        }
        Ok(ReadChunk::More(n))
    }

    /// Drains the iterator into a vector. Test and tooling convenience.
    pub fn collect_samples(mut self) -> Result<Vec<(Timestamp, f64)>> {
        let mut out = Vec::new();
        let mut ts = vec![0u64; 256];
        let mut vals = vec![0f64; 256];
        loop {
            let chunk = self.read(&mut ts, &mut vals)?;
            let n = chunk.len();
            out.extend(ts[..n].iter().copied().zip(vals[..n].iter().copied()));
            if chunk.is_done() {
                return Ok(out);
            }
        }
    }
}
