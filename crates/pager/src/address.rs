//! Address types for physical and virtual memory.
//!
//! This module provides architecture-independent wrappers around physical and virtual
//! addresses, with the alignment helpers the frame allocator and the pager rely on.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PAGE_SIZE, PageNumber};

/// Number of bits in a physical address (Sv39 physical addresses are 56 bits wide).
pub const MAX_PHYSICAL_BITS: usize = 56;

/// Number of bits translated by a three-level page table with 4 KiB pages.
pub const MAX_VIRTUAL_BITS: usize = 39;

/// One past the highest user virtual address.
///
/// One bit less than the translated width, which avoids having to sign-extend
/// virtual addresses that have the high bit set.
pub const MAX_VIRTUAL: usize = 1 << (MAX_VIRTUAL_BITS - 1);

/// Rounds `value` up to the next multiple of [`PAGE_SIZE`].
#[inline]
pub const fn page_round_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Rounds `value` down to a multiple of [`PAGE_SIZE`].
#[inline]
pub const fn page_round_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// Defines the structure and methods shared by both address types.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Checks if the address sits on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(PAGE_SIZE)
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (PAGE_SIZE - 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Frames are identified by the physical address of their first byte."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            addr < (1 << MAX_PHYSICAL_BITS),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / PAGE_SIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address inside one address space."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address is outside the translated range.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            addr < (1 << MAX_VIRTUAL_BITS),
            "virtual address exceeds maximum width"
        );
        Self(addr)
    }

    /// Creates a virtual address from an untrusted value, such as a faulting address
    /// reported by hardware.
    #[inline]
    pub const fn try_new(addr: usize) -> Option<Self> {
        if addr < (1 << MAX_VIRTUAL_BITS) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns whether this address lies in the user half of the address space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < MAX_VIRTUAL
    }

    /// Returns the page table index for this address at the given level.
    ///
    /// Level 0 is the leaf table; each level consumes nine bits above the page offset.
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        assert!(level < 3, "page table level out of range");
        (self.0 >> (12 + level * 9)) & 0x1ff
    }

    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 / PAGE_SIZE)
    }
}
