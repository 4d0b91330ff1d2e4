//! Per-frame reference counts.
//!
//! The frame table is an arena of [`Frame`] descriptors, one per frame in the managed
//! physical range, indexed by frame number. Reference counts are atomic and private to
//! each frame, so sharing bookkeeping never contends on a table-wide lock.

use alloc::boxed::Box;

use crate::{Frame, FrameNumber, PAGE_SIZE, PhysicalAddress, page_round_down, page_round_up};

/// Reference counts and free-list links for every managed frame.
pub struct FrameTable {
    /// Number of the first managed frame.
    first: FrameNumber,
    /// One descriptor per managed frame.
    frames: Box<[Frame]>,
}

impl FrameTable {
    /// Creates a table covering the whole frames inside `[start, end)`.
    ///
    /// `start` is rounded up and `end` rounded down to frame boundaries, so a partial
    /// frame at either edge is never managed.
    pub fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        let first = page_round_up(start.as_usize()) / PAGE_SIZE;
        let last = page_round_down(end.as_usize()) / PAGE_SIZE;
        let count = last.saturating_sub(first);

        Self {
            first: FrameNumber::new(first),
            frames: (0..count).map(|_| Frame::default()).collect(),
        }
    }

    /// Returns the number of managed frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if no frame is managed.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns the managed physical range as `[start, end)`.
    pub fn range(&self) -> (PhysicalAddress, PhysicalAddress) {
        let end = self.first + self.frames.len();
        (self.first.start(), end.start())
    }

    /// Returns the managed frame numbers in ascending order.
    pub fn frame_numbers(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        (0..self.frames.len()).map(|index| self.first + index)
    }

    /// Returns true if the frame containing `addr` is managed by this table.
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        self.descriptor(addr.frame_number()).is_some()
    }

    /// Returns the descriptor for the frame containing `addr`.
    pub fn frame(&self, addr: PhysicalAddress) -> Option<&Frame> {
        self.descriptor(addr.frame_number())
    }

    /// Returns the descriptor for a frame number.
    pub fn descriptor(&self, number: FrameNumber) -> Option<&Frame> {
        let index = number.as_usize().checked_sub(self.first.as_usize())?;
        self.frames.get(index)
    }

    /// Adds a reference to the frame containing `addr`.
    ///
    /// Frames outside the managed range are not reference counted and are ignored.
    pub fn increment(&self, addr: PhysicalAddress) {
        if let Some(frame) = self.frame(addr) {
            frame.acquire();
        }
    }

    /// Drops a reference to the frame containing `addr`, returning the remaining count.
    ///
    /// Frames outside the managed range report zero.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero.
    pub fn decrement(&self, addr: PhysicalAddress) -> u16 {
        self.frame(addr).map_or(0, Frame::release)
    }

    /// Returns the reference count of the frame containing `addr`.
    pub fn ref_count(&self, addr: PhysicalAddress) -> u16 {
        self.frame(addr).map_or(0, Frame::ref_count)
    }
}
