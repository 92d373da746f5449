//! On-disk node encoding for append trees.
//!
//! Every sealed node occupies one block and carries a fixed header followed
//! by a CRC32-protected payload:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Node Header (54 bytes)                      │
//! │  - Magic: "CRNB" (4 bytes)                   │
//! │  - Version: u16 = 1                          │
//! │  - Kind: u8 (1 = leaf, 2 = inner)            │
//! │  - Reserved: 1 byte                          │
//! │  - Series id: u64                            │
//! │  - Level: u16                                │
//! │  - Count: u32 (samples or children)          │
//! │  - Prev: u64 (same-level backlink, MAX=none) │
//! │  - Min/Max timestamp: u64 × 2                │
//! │  - Payload length: u32                       │
//! │  - Payload CRC32: u32                        │
//! ├──────────────────────────────────────────────┤
//! │  Payload                                     │
//! │  leaf:  ts stream len u32 | ts bits | values │
//! │  inner: child entries × 28 bytes             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The prev backlink chains all sealed nodes of one level, oldest last; leaf
//! chains alone are a complete recovery set, inner nodes accelerate index
//! reconstruction.

use crate::block::LogicAddr;
use crate::error::{Result, StoreError};
use crate::model::{SeriesId, Timestamp};
use crate::tree::codec;

/// Magic bytes for a node block: "CRNB".
pub const NODE_MAGIC: [u8; 4] = *b"CRNB";

/// Current node format version.
pub const NODE_VERSION: u16 = 1;

/// Node header size in bytes.
pub const NODE_HEADER_SIZE: usize = 54;

/// Serialized size of one inner-node child entry.
pub const CHILD_ENTRY_SIZE: usize = 28;

const NO_PREV: u64 = u64::MAX;

/// Kind tag of a sealed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    /// Level-0 node holding coded samples.
    Leaf = 1,
    /// Level ≥ 1 node holding child entries.
    Inner = 2,
}

impl NodeKind {
    /// Creates a NodeKind from a raw u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Leaf),
            2 => Some(Self::Inner),
            _ => None,
        }
    }
}

/// Decoded node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Node kind.
    pub kind: NodeKind,
    /// Series the node belongs to.
    pub series: SeriesId,
    /// Tree level (0 for leaves).
    pub level: u16,
    /// Number of samples (leaf) or children (inner).
    pub count: u32,
    /// Address of the previously sealed node at the same level.
    pub prev: Option<LogicAddr>,
    /// Smallest timestamp covered by the node.
    pub min_ts: Timestamp,
    /// Largest timestamp covered by the node.
    pub max_ts: Timestamp,
}

/// Reference to a sealed node one level down, as stored in inner nodes and
/// in the in-memory leaf index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    /// Address of the child node.
    pub addr: LogicAddr,
    /// Smallest timestamp under the child.
    pub min_ts: Timestamp,
    /// Largest timestamp under the child.
    pub max_ts: Timestamp,
    /// Total number of samples under the child.
    pub count: u32,
}

impl ChildEntry {
    /// True if the child's timestamp span intersects `[begin, end)`.
    pub fn overlaps(&self, begin: Timestamp, end: Timestamp) -> bool {
        self.max_ts >= begin && self.min_ts < end
    }

    /// True if the child's timestamp span intersects the reverse window
    /// `(end, begin]`.
    pub fn overlaps_rev(&self, begin: Timestamp, end: Timestamp) -> bool {
        self.max_ts > end && self.min_ts <= begin
    }
}

fn write_header(
    out: &mut Vec<u8>,
    kind: NodeKind,
    series: SeriesId,
    level: u16,
    count: u32,
    prev: Option<LogicAddr>,
    min_ts: Timestamp,
    max_ts: Timestamp,
    payload: &[u8],
) {
    out.extend_from_slice(&NODE_MAGIC);
    out.extend_from_slice(&NODE_VERSION.to_le_bytes());
    out.push(kind as u8);
    out.push(0);
    out.extend_from_slice(&series.to_le_bytes());
    out.extend_from_slice(&level.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&prev.unwrap_or(NO_PREV).to_le_bytes());
    out.extend_from_slice(&min_ts.to_le_bytes());
    out.extend_from_slice(&max_ts.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Decodes and validates a node header without touching the payload.
pub fn decode_header(bytes: &[u8]) -> Result<NodeHeader> {
    if bytes.len() < NODE_HEADER_SIZE {
        return Err(StoreError::Decode("block shorter than node header".into()));
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[0..4]);
    if magic != NODE_MAGIC {
        return Err(StoreError::InvalidMagic(magic));
    }
    let version = read_u16(bytes, 4);
    if version != NODE_VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }
    let kind = NodeKind::from_u8(bytes[6])
        .ok_or_else(|| StoreError::Decode(format!("unknown node kind {}", bytes[6])))?;
    let prev = match read_u64(bytes, 22) {
        NO_PREV => None,
        addr => Some(addr),
    };
    Ok(NodeHeader {
        kind,
        series: read_u64(bytes, 8),
        level: read_u16(bytes, 16),
        count: read_u32(bytes, 18),
        prev,
        min_ts: read_u64(bytes, 30),
        max_ts: read_u64(bytes, 38),
    })
}

fn checked_payload(bytes: &[u8]) -> Result<&[u8]> {
    let payload_len = read_u32(bytes, 46) as usize;
    let end = NODE_HEADER_SIZE + payload_len;
    if end > bytes.len() {
        return Err(StoreError::Decode("payload length exceeds block".into()));
    }
    let payload = &bytes[NODE_HEADER_SIZE..end];
    let expected = read_u32(bytes, 50);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(StoreError::ChecksumMismatch { expected, actual });
    }
    Ok(payload)
}

/// Encodes a leaf node from buffered samples.
///
/// `samples` must be non-empty; min/max timestamps are derived from it.
pub fn encode_leaf(
    series: SeriesId,
    prev: Option<LogicAddr>,
    samples: &[(Timestamp, f64)],
) -> Vec<u8> {
    debug_assert!(!samples.is_empty());
    let min_ts = samples.iter().map(|s| s.0).min().unwrap_or(0);
    let max_ts = samples.iter().map(|s| s.0).max().unwrap_or(0);

    let (ts_bytes, val_bytes) = codec::encode_samples(samples);
    let mut payload = Vec::with_capacity(4 + ts_bytes.len() + val_bytes.len());
    payload.extend_from_slice(&(ts_bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(&ts_bytes);
    payload.extend_from_slice(&val_bytes);

    let mut out = Vec::with_capacity(NODE_HEADER_SIZE + payload.len());
    write_header(
        &mut out,
        NodeKind::Leaf,
        series,
        0,
        samples.len() as u32,
        prev,
        min_ts,
        max_ts,
        &payload,
    );
    out
}

/// Decodes a leaf node back into its header and samples.
pub fn decode_leaf(bytes: &[u8]) -> Result<(NodeHeader, Vec<(Timestamp, f64)>)> {
    let header = decode_header(bytes)?;
    if header.kind != NodeKind::Leaf {
        return Err(StoreError::Decode("expected a leaf node".into()));
    }
    let payload = checked_payload(bytes)?;
    if payload.len() < 4 {
        return Err(StoreError::Decode("leaf payload too short".into()));
    }
    let ts_len = read_u32(payload, 0) as usize;
    if 4 + ts_len > payload.len() {
        return Err(StoreError::Decode("timestamp stream exceeds payload".into()));
    }
    let samples = codec::decode_samples(
        &payload[4..4 + ts_len],
        &payload[4 + ts_len..],
        header.count as usize,
    )?;
    Ok((header, samples))
}

/// Encodes an inner node from accumulated child entries.
pub fn encode_inner(
    series: SeriesId,
    level: u16,
    prev: Option<LogicAddr>,
    children: &[ChildEntry],
) -> Vec<u8> {
    debug_assert!(!children.is_empty());
    let min_ts = children.iter().map(|c| c.min_ts).min().unwrap_or(0);
    let max_ts = children.iter().map(|c| c.max_ts).max().unwrap_or(0);

    let mut payload = Vec::with_capacity(children.len() * CHILD_ENTRY_SIZE);
    for child in children {
        payload.extend_from_slice(&child.addr.to_le_bytes());
        payload.extend_from_slice(&child.min_ts.to_le_bytes());
        payload.extend_from_slice(&child.max_ts.to_le_bytes());
        payload.extend_from_slice(&child.count.to_le_bytes());
    }

    let mut out = Vec::with_capacity(NODE_HEADER_SIZE + payload.len());
    write_header(
        &mut out,
        NodeKind::Inner,
        series,
        level,
        children.len() as u32,
        prev,
        min_ts,
        max_ts,
        &payload,
    );
    out
}

/// Decodes an inner node back into its header and child entries.
pub fn decode_inner(bytes: &[u8]) -> Result<(NodeHeader, Vec<ChildEntry>)> {
    let header = decode_header(bytes)?;
    if header.kind != NodeKind::Inner {
        return Err(StoreError::Decode("expected an inner node".into()));
    }
    let payload = checked_payload(bytes)?;
    let count = header.count as usize;
    if payload.len() != count * CHILD_ENTRY_SIZE {
        return Err(StoreError::Decode("inner payload size mismatch".into()));
    }
    let mut children = Vec::with_capacity(count);
    for i in 0..count {
        let at = i * CHILD_ENTRY_SIZE;
        children.push(ChildEntry {
            addr: read_u64(payload, at),
            min_ts: read_u64(payload, at + 8),
            max_ts: read_u64(payload, at + 16),
            count: read_u32(payload, at + 24),
        });
    }
    Ok((header, children))
}
