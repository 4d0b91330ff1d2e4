//! Page and frame number types.
//!
//! Frame numbers index the frame arena; page numbers identify virtual pages.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Defines the functionality shared by frame and page numbers.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
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

impl_page_number_common!(
    FrameNumber,
    "A physical frame number.\n\n\
     Frame `n` covers the physical bytes `[n * PAGE_SIZE, (n + 1) * PAGE_SIZE)`."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

impl_page_number_common!(PageNumber, "A virtual page number.");

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }
}
