//! Error and Result types for cairn storage operations.

use crate::block::LogicAddr;
use crate::model::SeriesId;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for cairn operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for column-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid magic bytes in a block or volume header.
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported on-disk format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Node payload checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// A logical address does not resolve to a stored block.
    #[error("Block not found: {0}")]
    BlockNotFound(LogicAddr),

    /// A block payload exceeds the store's fixed block size.
    #[error("Block overflow: {len} bytes does not fit a {capacity}-byte block")]
    BlockOverflow {
        /// Size of the rejected payload.
        len: usize,
        /// Block capacity of the store.
        capacity: usize,
    },

    /// Requested series is not registered in the column store.
    #[error("Series not found: {0}")]
    SeriesNotFound(SeriesId),

    /// Attempt to register a series id that already exists.
    #[error("Series already exists: {0}")]
    SeriesExists(SeriesId),

    /// Attempt to append to a series whose tree has been closed.
    #[error("Series closed: {0}")]
    SeriesClosed(SeriesId),

    /// Rejected sample payload: wrong payload type or non-finite value.
    #[error("Bad value: only finite float payloads are storable")]
    BadValue,

    /// A sample's series id is not a key of the group-by mapping.
    #[error("Group-by mismatch: unexpected series {0}")]
    GroupByMismatch(SeriesId),

    /// The requested operation is not supported by this engine.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Error while decoding a node payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}
