//! Page table entries.

use crate::{MAX_PHYSICAL_BITS, PAGE_SIZE, PhysicalAddress};

use super::flags::PageFlags;

/// A single leaf page table entry.
///
/// The low twelve bits hold [`PageFlags`]; the bits above hold the page-aligned
/// physical address of the mapped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Physical address mask (bits 12 up to the physical address width).
    const ADDRESS_MASK: usize = ((1 << MAX_PHYSICAL_BITS) - 1) & !(PAGE_SIZE - 1);

    /// Creates a new page table entry.
    ///
    /// The physical address must be page-aligned.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.is_page_aligned(),
            "physical address must be page-aligned"
        );
        Self((address.as_usize() & Self::ADDRESS_MASK) | flags.to_raw())
    }

    /// Returns the physical address stored in this entry.
    ///
    /// Returns None if the entry is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.is_present()
            .then(|| PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | flags.to_raw();
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_address_and_flags() {
        let mut flags = PageFlags::user(true, true, false);
        flags.set_present(true);
        let mut entry = PageEntry::new(PhysicalAddress::new(0x8765_4000), flags);

        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x8765_4000)));
        assert_eq!(entry.flags(), flags);

        flags.set_dirty(true);
        entry.set_flags(flags);
        assert!(entry.flags().is_dirty());
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x8765_4000)));

        entry.clear();
        assert!(!entry.is_present());
        assert_eq!(entry.address(), None);
    }

    #[test]
    fn absent_entries_have_no_address() {
        let entry = PageEntry::new(PhysicalAddress::new(0x1000), PageFlags::user(true, false, false));
        assert_eq!(entry.address(), None);
    }
}
