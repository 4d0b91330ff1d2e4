//! A software page table implementing [`PageMapper`].

use crate::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

use super::{
    PageMapper, PageTableError,
    entry::PageEntry,
    flags::PageFlags,
    table::{PAGE_TABLE_LEVELS, PageTable},
};

/// A three-level page table kept entirely in kernel heap memory.
///
/// It follows the Sv39 layout (nine index bits per level, 4 KiB pages) and is what the
/// pager runs against under software emulation.
pub struct PageDirectory {
    /// The root page table for this address space.
    root: PageTable,
}

impl PageDirectory {
    /// Creates a page directory with an empty root table.
    pub fn new() -> Self {
        Self {
            root: PageTable::new(),
        }
    }

    /// Walks the page table hierarchy to find the leaf entry for a virtual address.
    ///
    /// Returns None if any intermediate table is missing.
    fn walk(&self, virt: VirtualAddress) -> Option<PageEntry> {
        let mut table = &self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            table = table.child(virt.page_index(level))?;
        }
        Some(table.entry(virt.page_index(0)))
    }

    /// Like [`walk`](Self::walk), returning the entry for modification.
    fn walk_mut(&mut self, virt: VirtualAddress) -> Option<&mut PageEntry> {
        let mut table = &mut self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            table = table.child_mut(virt.page_index(level))?;
        }
        Some(table.entry_mut(virt.page_index(0)))
    }

    /// Walks the page table hierarchy, creating intermediate tables as needed.
    fn walk_or_create(&mut self, virt: VirtualAddress) -> &mut PageEntry {
        let mut table = &mut self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            table = table.child_or_create(virt.page_index(level));
        }
        table.entry_mut(virt.page_index(0))
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMapper for PageDirectory {
    fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), PageTableError> {
        if !virt.is_aligned(PAGE_SIZE) || !phys.is_aligned(PAGE_SIZE) {
            return Err(PageTableError::Unaligned);
        }
        if !virt.is_user() {
            return Err(PageTableError::OutOfRange);
        }

        let entry = self.walk_or_create(virt);
        if entry.is_present() {
            return Err(PageTableError::AlreadyMapped);
        }
        let mut flags = flags;
        flags.set_present(true);
        *entry = PageEntry::new(phys, flags);
        Ok(())
    }

    fn unmap(&mut self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.walk_mut(virt.align_down(PAGE_SIZE))?;
        let phys = entry.address()?;
        entry.clear();
        Some(phys)
    }

    fn translate(&self, virt: VirtualAddress) -> Option<(PhysicalAddress, PageFlags)> {
        let entry = self.walk(virt.align_down(PAGE_SIZE))?;
        Some((entry.address()?, entry.flags()))
    }

    fn update_flags(&mut self, virt: VirtualAddress, flags: PageFlags) -> Result<(), PageTableError> {
        let entry = self
            .walk_mut(virt.align_down(PAGE_SIZE))
            .filter(|entry| entry.is_present())
            .ok_or(PageTableError::NotMapped)?;
        let mut flags = flags;
        flags.set_present(true);
        entry.set_flags(flags);
        Ok(())
    }
}
