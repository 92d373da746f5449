//! Per-writer session with a private handle cache.
//!
//! A [`Session`] belongs to one logical writer (a connection or a thread)
//! and is not shared. Its cache maps series ids to tree handles learned
//! from the registry, so hot writes append directly without taking the
//! table lock. Entries are never invalidated: trees are never removed from
//! the registry for the life of the database, and the registry outlives
//! every session.

use crate::block::LogicAddr;
use crate::cstore::ColumnStore;
use crate::error::{Result, StoreError};
use crate::model::{Payload, Sample, SeriesId};
use crate::query::{ReshapeRequest, RowConsumer};
use crate::tree::{AppendOutcome, SeriesTree};
use std::collections::HashMap;
use std::sync::Arc;

/// Thread-local caching writer handle onto the column store.
pub struct Session {
    registry: Arc<ColumnStore>,
    cache: HashMap<SeriesId, Arc<SeriesTree>>,
}

impl Session {
    /// Creates a session over the shared registry.
    pub fn new(registry: Arc<ColumnStore>) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    /// Writes one sample.
    ///
    /// Cache hits append straight into the tree; misses go through the
    /// registry, which populates the cache on success. Either way a flush
    /// boundary fills `rescue_points` with the tree's current root set for
    /// external persistence.
    ///
    /// # Errors
    ///
    /// `BadValue` for non-float payloads, `SeriesNotFound` for ids the
    /// registry does not know, tree append errors otherwise.
    pub fn write(
        &mut self,
        sample: &Sample,
        rescue_points: &mut Vec<LogicAddr>,
    ) -> Result<AppendOutcome> {
        let value = match sample.payload {
            Payload::Float(v) => v,
            _ => return Err(StoreError::BadValue),
        };
        if let Some(tree) = self.cache.get(&sample.series) {
            let outcome = tree.append(sample.timestamp, value)?;
            if outcome == AppendOutcome::FlushNeeded {
                *rescue_points = tree.get_roots();
            }
            return Ok(outcome);
        }
        self.registry.write(sample, rescue_points, Some(&mut self.cache))
    }

    /// Runs a query through the registry. Sessions do not parallelize
    /// queries.
    pub fn query(&self, request: &ReshapeRequest, consumer: &mut dyn RowConsumer) {
        self.registry.query(request, consumer)
    }
}
