//! File-backed mapping regions.
//!
//! Every address space holds a fixed number of region slots. A region records which
//! file bytes back a virtual range; frames are only committed when the range faults.

use alloc::boxed::Box;
use core::fmt;
use core::ops::BitOr;

use crate::{FileRef, PageFlags, VirtualAddress};

/// Access permissions of a mapping region.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection(u8);

impl Protection {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Pages may be read.
    pub const READ: Self = Self(1 << 0);
    /// Pages may be written.
    pub const WRITE: Self = Self(1 << 1);
    /// Pages may be executed.
    pub const EXEC: Self = Self(1 << 2);

    /// Returns whether every permission in `other` is granted.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Protection {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |perm, c| if self.contains(perm) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::EXEC, 'x')
        )
    }
}

/// Whether stores to a region reach the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Dirty pages are written back to the file when unmapped.
    Shared,
    /// Changes stay private to the address space.
    Private,
}

/// A virtual range backed by a file.
#[derive(Clone)]
pub struct Region {
    start: VirtualAddress,
    length: usize,
    prot: Protection,
    sharing: Sharing,
    file: FileRef,
    offset: u64,
}

impl Region {
    /// Creates a region covering `[start, start + length)`, backed by `file` from `offset`.
    pub fn new(
        start: VirtualAddress,
        length: usize,
        prot: Protection,
        sharing: Sharing,
        file: FileRef,
        offset: u64,
    ) -> Self {
        Self {
            start,
            length,
            prot,
            sharing,
            file,
            offset,
        }
    }

    /// Returns the first address of the region.
    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Returns the length of the region in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns one past the last address of the region.
    pub fn end(&self) -> usize {
        self.start.as_usize() + self.length
    }

    /// Returns the region's permissions.
    pub fn protection(&self) -> Protection {
        self.prot
    }

    /// Returns the region's sharing mode.
    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    /// Returns the backing file.
    pub fn file(&self) -> &FileRef {
        &self.file
    }

    /// Returns the file offset backing the region's first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns whether `addr` lies inside the region.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        (self.start.as_usize()..self.end()).contains(&addr.as_usize())
    }

    /// Returns whether `[start, end)` lies entirely inside the region.
    pub fn covers(&self, start: usize, end: usize) -> bool {
        self.start.as_usize() <= start && end <= self.end()
    }

    /// Returns the file offset backing `addr`.
    pub fn file_offset(&self, addr: VirtualAddress) -> u64 {
        self.offset + (addr - self.start) as u64
    }

    /// Returns the page flags for a page of this region resolved by a fault.
    ///
    /// Pages are only writable, and marked dirty, once a store has faulted on them.
    pub fn page_flags(&self, store: bool) -> PageFlags {
        let write = store && self.prot.contains(Protection::WRITE);
        let mut flags = PageFlags::user(
            self.prot.contains(Protection::READ),
            write,
            self.prot.contains(Protection::EXEC),
        );
        flags.set_dirty(write);
        flags
    }

    /// Drops the first `length` bytes of the region.
    pub(crate) fn trim_front(&mut self, length: usize) {
        debug_assert!(length < self.length);
        self.start = self.start + length;
        self.offset += length as u64;
        self.length -= length;
    }

    /// Drops the last `length` bytes of the region.
    pub(crate) fn trim_back(&mut self, length: usize) {
        debug_assert!(length < self.length);
        self.length -= length;
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("prot", &self.prot)
            .field("sharing", &self.sharing)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity set of regions belonging to one address space.
///
/// Slots are reused once their region is removed.
#[derive(Clone)]
pub struct RegionTable {
    slots: Box<[Option<Region>]>,
}

impl RegionTable {
    /// Creates a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of valid regions.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if no region is valid.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the valid regions.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.slots.iter().flatten()
    }

    /// Returns the slot of the region containing `addr`.
    pub fn find(&self, addr: VirtualAddress) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.contains(addr)))
    }

    /// Returns the slot of the region covering all of `[start, end)`.
    pub fn find_covering(&self, start: usize, end: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.covers(start, end)))
    }

    /// Returns the region in `slot`.
    pub fn get(&self, slot: usize) -> Option<&Region> {
        self.slots.get(slot)?.as_ref()
    }

    /// Returns the region in `slot` for modification.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Region> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Returns the index of an empty slot.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Returns one past the highest address covered by any region, or zero.
    pub fn highest_end(&self) -> usize {
        self.iter().map(Region::end).max().unwrap_or(0)
    }

    /// Stores `region` in the empty `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is taken.
    pub fn insert(&mut self, slot: usize, region: Region) {
        let entry = &mut self.slots[slot];
        assert!(entry.is_none(), "region slot {slot} already in use");
        *entry = Some(region);
    }

    /// Empties `slot`, returning the region it held.
    pub fn remove(&mut self, slot: usize) -> Option<Region> {
        self.slots.get_mut(slot)?.take()
    }

    /// Empties every slot, returning the regions in slot order.
    pub fn drain(&mut self) -> impl Iterator<Item = Region> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}

impl fmt::Debug for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
