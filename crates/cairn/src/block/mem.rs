//! In-memory block store for tests and embedded use.

use crate::block::{BlockStore, LogicAddr, DEFAULT_BLOCK_SIZE};
use crate::error::{Result, StoreError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Block store keeping all blocks in memory.
///
/// Appends can be made to fail on demand with [`MemBlockStore::fail_appends`],
/// which lets tests exercise the engine's I/O failure semantics without a
/// real device.
pub struct MemBlockStore {
    blocks: RwLock<Vec<Vec<u8>>>,
    block_size: usize,
    fail_appends: AtomicBool,
}

impl MemBlockStore {
    /// Creates an empty store with the default block size.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Creates an empty store with an explicit block size.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
            block_size,
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent append fail with an I/O error until reset.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Returns true if no blocks have been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemBlockStore {
    fn read_block(&self, addr: LogicAddr) -> Result<Vec<u8>> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        blocks
            .get(addr as usize)
            .cloned()
            .ok_or(StoreError::BlockNotFound(addr))
    }

    fn append_block(&self, data: &[u8]) -> Result<LogicAddr> {
        if data.len() > self.block_size {
            return Err(StoreError::BlockOverflow {
                len: data.len(),
                capacity: self.block_size,
            });
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::IoError(io::Error::new(
                io::ErrorKind::Other,
                "injected append failure",
            )));
        }
        let mut block = data.to_vec();
        block.resize(self.block_size, 0);
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks.push(block);
        Ok(blocks.len() as LogicAddr - 1)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}
