//! File-backed block store: one append-only volume file.
//!
//! ## File Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Volume Header (16 bytes)                    │
//! │  - Magic: "CRNV" (4 bytes)                   │
//! │  - Version: u16 (2 bytes) = 1                │
//! │  - Block Size: u32 (4 bytes)                 │
//! │  - Reserved: 6 bytes                         │
//! ├──────────────────────────────────────────────┤
//! │  Block 0 (block_size bytes, zero-padded)     │
//! ├──────────────────────────────────────────────┤
//! │  Block 1 ...                                 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Block contents are opaque at this layer; integrity checksums live inside
//! the tree's node encoding.

use crate::block::{BlockStore, LogicAddr, DEFAULT_BLOCK_SIZE};
use crate::error::{Result, StoreError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// Magic bytes for a volume file header: "CRNV".
pub const VOLUME_MAGIC: [u8; 4] = *b"CRNV";

/// Current volume format version.
pub const VOLUME_VERSION: u16 = 1;

/// Volume header size in bytes.
pub const VOLUME_HEADER_SIZE: usize = 16;

struct VolumeState {
    file: File,
    blocks: u64,
}

/// Append-only block store backed by a single volume file.
pub struct FileBlockStore {
    state: Mutex<VolumeState>,
    block_size: usize,
}

impl FileBlockStore {
    /// Creates a new volume file at `path` with the default block size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header write
    /// fails.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_block_size(path, DEFAULT_BLOCK_SIZE)
    }

    /// Creates a new volume file with an explicit block size.
    pub fn create_with_block_size<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut header = [0u8; VOLUME_HEADER_SIZE];
        header[0..4].copy_from_slice(&VOLUME_MAGIC);
        header[4..6].copy_from_slice(&VOLUME_VERSION.to_le_bytes());
        header[6..10].copy_from_slice(&(block_size as u32).to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(Self {
            state: Mutex::new(VolumeState { file, blocks: 0 }),
            block_size,
        })
    }

    /// Opens an existing volume file, validating its header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMagic` or `UnsupportedVersion` for a foreign or
    /// newer-format file, `IoError` otherwise.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; VOLUME_HEADER_SIZE];
        file.read_exact(&mut header)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        if magic != VOLUME_MAGIC {
            return Err(StoreError::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VOLUME_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        let block_size = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let len = file.metadata()?.len();
        let blocks = (len - VOLUME_HEADER_SIZE as u64) / block_size as u64;

        Ok(Self {
            state: Mutex::new(VolumeState { file, blocks }),
            block_size,
        })
    }

    fn offset_of(&self, addr: LogicAddr) -> u64 {
        VOLUME_HEADER_SIZE as u64 + addr * self.block_size as u64
    }
}

impl BlockStore for FileBlockStore {
    fn read_block(&self, addr: LogicAddr) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if addr >= state.blocks {
            return Err(StoreError::BlockNotFound(addr));
        }
        let offset = self.offset_of(addr);
        state.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.block_size];
        state.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append_block(&self, data: &[u8]) -> Result<LogicAddr> {
        if data.len() > self.block_size {
            return Err(StoreError::BlockOverflow {
                len: data.len(),
                capacity: self.block_size,
            });
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let addr = state.blocks;
        let offset = self.offset_of(addr);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        if data.len() < self.block_size {
            let padding = vec![0u8; self.block_size - data.len()];
            state.file.write_all(&padding)?;
        }
        state.blocks += 1;
        Ok(addr)
    }

    fn sync(&self) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.file.sync_all()?;
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}
