//! Page table entry flags.

/// Flags of a leaf page table entry.
///
/// The layout follows the RISC-V Sv39 format. Bit 8 is reserved for software and
/// marks pages shared copy-on-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(usize);

impl PageFlags {
    /// Valid bit.
    const PRESENT: usize = 1 << 0;
    /// Readable bit.
    const READABLE: usize = 1 << 1;
    /// Writable bit.
    const WRITABLE: usize = 1 << 2;
    /// Executable bit.
    const EXECUTABLE: usize = 1 << 3;
    /// User-accessible bit.
    const USER: usize = 1 << 4;
    /// Dirty bit.
    const DIRTY: usize = 1 << 7;
    /// Software bit: the frame is shared and must be copied before the first write.
    const COPY_ON_WRITE: usize = 1 << 8;

    /// Mask of every bit this type knows about.
    pub const MASK: usize = 0x1ff;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates flags for a user page with the given permissions.
    pub const fn user(read: bool, write: bool, execute: bool) -> Self {
        let mut bits = Self::USER;
        if read {
            bits |= Self::READABLE;
        }
        if write {
            bits |= Self::WRITABLE;
        }
        if execute {
            bits |= Self::EXECUTABLE;
        }
        Self(bits)
    }

    /// Creates page flags from a raw value.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw & Self::MASK)
    }

    /// Returns the raw value of these flags.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    const fn test(self, bit: usize) -> bool {
        self.0 & bit != 0
    }

    fn assign(&mut self, bit: usize, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// Returns whether the present bit is set.
    pub const fn is_present(self) -> bool {
        self.test(Self::PRESENT)
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.assign(Self::PRESENT, present);
    }

    /// Returns whether the readable bit is set.
    pub const fn is_readable(self) -> bool {
        self.test(Self::READABLE)
    }

    /// Sets or clears the readable bit.
    pub fn set_readable(&mut self, readable: bool) {
        self.assign(Self::READABLE, readable);
    }

    /// Returns whether the writable bit is set.
    pub const fn is_writable(self) -> bool {
        self.test(Self::WRITABLE)
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        self.assign(Self::WRITABLE, writable);
    }

    /// Returns whether the executable bit is set.
    pub const fn is_executable(self) -> bool {
        self.test(Self::EXECUTABLE)
    }

    /// Sets or clears the executable bit.
    pub fn set_executable(&mut self, executable: bool) {
        self.assign(Self::EXECUTABLE, executable);
    }

    /// Returns whether the user-accessible bit is set.
    pub const fn is_user(self) -> bool {
        self.test(Self::USER)
    }

    /// Returns whether the dirty bit is set.
    pub const fn is_dirty(self) -> bool {
        self.test(Self::DIRTY)
    }

    /// Sets or clears the dirty bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.assign(Self::DIRTY, dirty);
    }

    /// Returns whether the page is shared copy-on-write.
    pub const fn is_copy_on_write(self) -> bool {
        self.test(Self::COPY_ON_WRITE)
    }

    /// Sets or clears the copy-on-write bit.
    pub fn set_copy_on_write(&mut self, cow: bool) {
        self.assign(Self::COPY_ON_WRITE, cow);
    }
}
