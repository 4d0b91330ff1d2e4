//! Page table nodes for the software page table.

use alloc::boxed::Box;

use super::entry::PageEntry;

/// Number of entries in each table.
pub const ENTRY_COUNT: usize = 512;

/// Number of page table levels (level 2 is the root, level 0 holds leaf entries).
pub const PAGE_TABLE_LEVELS: usize = 3;

/// One level of a software page table.
///
/// Leaf tables only use `entries`. Interior tables own their children directly rather
/// than through physical addresses, since the host has no direct map to walk.
pub struct PageTable {
    entries: Box<[PageEntry; ENTRY_COUNT]>,
    children: Box<[Option<Box<PageTable>>; ENTRY_COUNT]>,
}

impl PageTable {
    /// Creates a new, empty page table.
    pub fn new() -> Self {
        Self {
            entries: Box::new([PageEntry::default(); ENTRY_COUNT]),
            children: Box::new(core::array::from_fn(|_| None)),
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        &mut self.entries[index]
    }

    /// Returns the child table at the given index, if one exists.
    pub fn child(&self, index: usize) -> Option<&PageTable> {
        self.children[index].as_deref()
    }

    /// Returns the child table at the given index for modification, if one exists.
    pub fn child_mut(&mut self, index: usize) -> Option<&mut PageTable> {
        self.children[index].as_deref_mut()
    }

    /// Returns the child table at the given index, creating it if needed.
    pub fn child_or_create(&mut self, index: usize) -> &mut PageTable {
        self.children[index].get_or_insert_with(|| Box::new(PageTable::new()))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
