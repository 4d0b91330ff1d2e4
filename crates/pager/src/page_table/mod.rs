//! Page tables as seen by the pager.
//!
//! The process subsystem owns each address space's page table; the pager only needs the
//! handful of operations in [`PageMapper`]. A software [`PageDirectory`] implements it for
//! host builds.

#[cfg(any(test, feature = "software-emulation"))]
mod directory;
mod entry;
mod flags;
#[cfg(any(test, feature = "software-emulation"))]
mod table;

#[cfg(any(test, feature = "software-emulation"))]
pub use directory::PageDirectory;
pub use entry::PageEntry;
pub use flags::PageFlags;
#[cfg(any(test, feature = "software-emulation"))]
pub use table::PageTable;

use crate::{PhysicalAddress, VirtualAddress};

/// Errors reported by page table updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PageTableError {
    /// A virtual or physical address was not page-aligned.
    #[error("address is not page-aligned")]
    Unaligned,
    /// The virtual address lies outside the user part of the address space.
    #[error("address outside the user address space")]
    OutOfRange,
    /// The page already has a present mapping.
    #[error("page is already mapped")]
    AlreadyMapped,
    /// The page has no present mapping.
    #[error("page is not mapped")]
    NotMapped,
    /// A table page could not be allocated.
    #[error("out of memory for page tables")]
    OutOfMemory,
}

/// Operations the pager performs on an address space's page table.
///
/// Virtual addresses passed to [`map`](Self::map) must be page-aligned; the other
/// operations act on the page containing the address.
pub trait PageMapper {
    /// Maps the page at `virt` to the frame at `phys`. The present bit is implied.
    fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), PageTableError>;

    /// Removes the mapping of the page at `virt`, returning the frame it mapped.
    ///
    /// The frame's reference is not dropped; that is the caller's decision.
    fn unmap(&mut self, virt: VirtualAddress) -> Option<PhysicalAddress>;

    /// Returns the frame and flags of a present mapping.
    fn translate(&self, virt: VirtualAddress) -> Option<(PhysicalAddress, PageFlags)>;

    /// Replaces the flags of a present mapping. The present bit is implied.
    fn update_flags(&mut self, virt: VirtualAddress, flags: PageFlags) -> Result<(), PageTableError>;

    /// Returns whether the page at `virt` has a present mapping.
    fn is_present(&self, virt: VirtualAddress) -> bool {
        self.translate(virt).is_some()
    }

    /// Returns whether the page at `virt` is mapped and has been written to.
    fn is_dirty(&self, virt: VirtualAddress) -> bool {
        self.translate(virt)
            .is_some_and(|(_, flags)| flags.is_dirty())
    }

    /// Makes a present mapping writable and marks it dirty.
    fn mark_dirty_writable(&mut self, virt: VirtualAddress) -> Result<(), PageTableError> {
        let (_, mut flags) = self.translate(virt).ok_or(PageTableError::NotMapped)?;
        flags.set_writable(true);
        flags.set_dirty(true);
        self.update_flags(virt, flags)
    }
}
