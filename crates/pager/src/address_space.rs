//! Address space management.
//!
//! An address space pairs a page table owned by the process subsystem with the pager's
//! bookkeeping: the mapping regions and the lazily grown heap.

use crate::{PageMapper, PagerConfig, RegionTable, VirtualAddress, page_round_down};

/// The part of a process's virtual memory the pager manages.
///
/// The heap occupies `[0, size)`. Pages in it are committed on first touch, except for
/// the guard below the user stack pointer: addresses under the page containing the
/// stack pointer never fault in.
pub struct AddressSpace<P: PageMapper> {
    /// The page table for this address space.
    page_table: P,
    /// File-backed mapping regions.
    regions: RegionTable,
    /// Logical end of the heap.
    size: usize,
    /// User stack pointer at the time of the last trap.
    stack_pointer: usize,
}

impl<P: PageMapper> AddressSpace<P> {
    /// Creates an empty address space over `page_table`.
    pub fn new(page_table: P, config: &PagerConfig) -> Self {
        Self {
            page_table,
            regions: RegionTable::new(config.max_regions),
            size: 0,
            stack_pointer: 0,
        }
    }

    /// Creates an address space whose heap already spans `[0, size)`, e.g. after
    /// loading an executable.
    pub fn with_size(page_table: P, config: &PagerConfig, size: usize) -> Self {
        let mut space = Self::new(page_table, config);
        space.size = size;
        space
    }

    /// Returns a reference to the page table for this address space.
    pub fn page_table(&self) -> &P {
        &self.page_table
    }

    /// Returns a mutable reference to the page table for this address space.
    pub fn page_table_mut(&mut self) -> &mut P {
        &mut self.page_table
    }

    /// Returns the mapping regions.
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub(crate) fn regions_mut(&mut self) -> &mut RegionTable {
        &mut self.regions
    }

    /// Borrows the page table and the regions at the same time.
    pub(crate) fn split_mut(&mut self) -> (&mut P, &mut RegionTable) {
        (&mut self.page_table, &mut self.regions)
    }

    /// Returns the logical size of the heap.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Returns the recorded user stack pointer.
    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// Records the user stack pointer; the trap handler calls this before resolving
    /// a fault.
    pub fn set_stack_pointer(&mut self, stack_pointer: usize) {
        self.stack_pointer = stack_pointer;
    }

    /// Returns whether a fault at `addr` may be resolved as a heap page.
    pub fn is_heap_address(&self, addr: VirtualAddress) -> bool {
        (page_round_down(self.stack_pointer)..self.size).contains(&addr.as_usize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PAGE_SIZE, PageDirectory};

    #[test]
    fn heap_window() {
        let config = PagerConfig::default();
        let mut space = AddressSpace::with_size(PageDirectory::new(), &config, 8 * PAGE_SIZE);
        space.set_stack_pointer(3 * PAGE_SIZE + 0x80);

        assert!(!space.is_heap_address(VirtualAddress::new(2 * PAGE_SIZE)));
        assert!(space.is_heap_address(VirtualAddress::new(3 * PAGE_SIZE)));
        assert!(space.is_heap_address(VirtualAddress::new(8 * PAGE_SIZE - 1)));
        assert!(!space.is_heap_address(VirtualAddress::new(8 * PAGE_SIZE)));
    }

    #[test]
    fn regions_follow_config() {
        let config = PagerConfig::new().with_max_regions(3);
        let space = AddressSpace::new(PageDirectory::new(), &config);
        assert_eq!(space.regions().capacity(), 3);
        assert_eq!(space.size(), 0);
    }
}
