//! Pager configuration.

use crate::{MAX_VIRTUAL, PAGE_SIZE};

/// Default number of mapping regions per address space.
pub const DEFAULT_MAX_REGIONS: usize = 16;

/// Default lowest virtual address handed out for memory-mapped files.
pub const DEFAULT_MMAP_BASE: usize = 1 << 37;

/// Highest address a mapping may reach: the trap-frame and trampoline pages sit above.
pub const DEFAULT_MMAP_LIMIT: usize = MAX_VIRTUAL - 2 * PAGE_SIZE;

/// Blocks a single file-system transaction may modify.
const MAX_OP_BLOCKS: usize = 10;

/// File-system block size in bytes.
const BLOCK_SIZE: usize = 1024;

/// Default number of bytes written back per file-system transaction.
///
/// A write touches the inode and bitmap blocks besides the data blocks, and unaligned
/// writes may touch two partial blocks, so only half of what remains is usable.
pub const DEFAULT_WRITEBACK_CHUNK: usize = ((MAX_OP_BLOCKS - 1 - 1 - 2) / 2) * BLOCK_SIZE;

/// Tunables for region placement, heap growth and write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    /// Number of region slots in each address space.
    pub max_regions: usize,
    /// Lowest virtual address a mapping may start at.
    pub mmap_base: usize,
    /// One past the highest virtual address a mapping may cover.
    pub mmap_limit: usize,
    /// One past the highest virtual address the heap may grow to.
    pub heap_limit: usize,
    /// Largest number of bytes written back inside one file-system transaction.
    pub writeback_chunk: usize,
}

impl PagerConfig {
    /// Returns the default configuration.
    pub const fn new() -> Self {
        Self {
            max_regions: DEFAULT_MAX_REGIONS,
            mmap_base: DEFAULT_MMAP_BASE,
            mmap_limit: DEFAULT_MMAP_LIMIT,
            heap_limit: DEFAULT_MMAP_BASE,
            writeback_chunk: DEFAULT_WRITEBACK_CHUNK,
        }
    }

    /// Sets the number of region slots per address space.
    pub const fn with_max_regions(mut self, max_regions: usize) -> Self {
        self.max_regions = max_regions;
        self
    }

    /// Sets the range of virtual addresses available to mappings.
    pub const fn with_mmap_range(mut self, base: usize, limit: usize) -> Self {
        self.mmap_base = base;
        self.mmap_limit = limit;
        self
    }

    /// Sets the highest virtual address the heap may grow to.
    pub const fn with_heap_limit(mut self, heap_limit: usize) -> Self {
        self.heap_limit = heap_limit;
        self
    }

    /// Sets the number of bytes written back per file-system transaction.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is zero.
    pub const fn with_writeback_chunk(mut self, chunk: usize) -> Self {
        assert!(chunk > 0, "write-back chunk must not be empty");
        self.writeback_chunk = chunk;
        self
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
