//! Query request shapes and the consumer contract.
//!
//! A [`ReshapeRequest`] is produced by the external query parser and
//! describes which series to read, over which time range, in which order,
//! and whether a group-by projection applies. The column store drives the
//! matching row stream into a [`RowConsumer`].

use crate::error::StoreError;
use crate::model::{Sample, SeriesId, Timestamp};
use std::collections::HashMap;
use std::fmt;

/// Ordering of the composed row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    /// All samples of the first series, then the second, and so on.
    Series,
    /// Global timestamp order across series. Not implemented by this
    /// engine; requests are rejected with a not-implemented error.
    Time,
}

/// The series and time window a query selects.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Requested series, in output order.
    pub ids: Vec<SeriesId>,
    /// Start of the half-open time range.
    pub begin: Timestamp,
    /// End of the half-open time range.
    pub end: Timestamp,
}

/// Group-by projection descriptor.
///
/// This engine only validates membership: every emitted sample's series id
/// must be a key of `transient_map`. The projection itself is applied by
/// the consumer.
#[derive(Debug, Clone, Default)]
pub struct GroupBy {
    /// Whether the query groups series.
    pub enabled: bool,
    /// Maps each selected series to its group key.
    pub transient_map: HashMap<SeriesId, SeriesId>,
}

/// Query descriptor handed to [`crate::ColumnStore::query`].
#[derive(Debug, Clone)]
pub struct ReshapeRequest {
    /// Series and time window.
    pub select: Selection,
    /// Requested output ordering.
    pub order_by: OrderBy,
    /// Group-by projection descriptor.
    pub group_by: GroupBy,
}

impl ReshapeRequest {
    /// Creates an order-by-series request over `[begin, end)` without
    /// group-by.
    pub fn series_scan(ids: Vec<SeriesId>, begin: Timestamp, end: Timestamp) -> Self {
        Self {
            select: Selection { ids, begin, end },
            order_by: OrderBy::Series,
            group_by: GroupBy::default(),
        }
    }
}

impl fmt::Display for ReshapeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReshapeRequest(")?;
        match self.order_by {
            OrderBy::Series => write!(f, "order-by: series, ")?,
            OrderBy::Time => write!(f, "order-by: time, ")?,
        }
        if self.group_by.enabled {
            write!(f, "group-by: enabled, ")?;
        } else {
            write!(f, "group-by: disabled, ")?;
        }
        write!(
            f,
            "range-begin: {}, range-end: {}, select: {})",
            self.select.begin,
            self.select.end,
            self.select.ids.len()
        )
    }
}

/// Receiving end of a query.
///
/// The driver delivers samples one by one; returning `false` from
/// [`RowConsumer::put`] is back-pressure, stopping the query immediately
/// and without error. Errors are reported through
/// [`RowConsumer::set_error`]; a missing series does not end the query,
/// every other error does.
pub trait RowConsumer {
    /// Offers one sample. Return `false` to stop the query.
    fn put(&mut self, sample: Sample) -> bool;

    /// Reports a query error.
    fn set_error(&mut self, error: StoreError);
}
