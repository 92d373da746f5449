//! Cairn - columnar time-series storage engine.
//!
//! This crate provides the column-store core of a time-series database: a
//! concurrency-safe registry of per-series append trees, write routing
//! with thread-local fast paths, and composition of per-series range scans
//! into row-oriented query streams.
//!
//! # Components
//!
//! - [`BlockStore`]: fixed-size opaque block storage (file-backed or
//!   in-memory)
//! - [`SeriesTree`]: per-series append tree with sealed, checksummed,
//!   Gorilla-coded leaf blocks and crash-recovery root sets
//! - [`ColumnStore`]: the registry owning one tree per series
//! - [`Session`]: per-writer handle cache bypassing the registry lock
//! - [`ReshapeRequest`] / [`RowConsumer`]: the query boundary
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn::{ColumnStore, MemBlockStore, ReshapeRequest, Sample, Session};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemBlockStore::new());
//! let registry = Arc::new(ColumnStore::new(store));
//! registry.create_new_column(10)?;
//!
//! let mut session = Session::new(registry.clone());
//! let mut rescue_points = Vec::new();
//! session.write(&Sample::float(10, 100, 1.5), &mut rescue_points)?;
//!
//! let request = ReshapeRequest::series_scan(vec![10], 0, 1000);
//! registry.query(&request, &mut consumer);
//!
//! // Persist the map returned by close(); it reopens every tree.
//! let roots = registry.close();
//! ```

#![deny(missing_docs)]

pub mod block;
pub mod cstore;
pub mod error;
pub mod model;
pub mod query;
pub mod session;
pub mod tree;

pub use block::{BlockStore, FileBlockStore, LogicAddr, MemBlockStore};
pub use cstore::ColumnStore;
pub use error::{Result, StoreError};
pub use model::{Payload, Sample, SeriesId, Timestamp};
pub use query::{GroupBy, OrderBy, ReshapeRequest, RowConsumer, Selection};
pub use session::Session;
pub use tree::{AppendOutcome, RangeIterator, ReadChunk, SeriesTree, TreeConfig};
