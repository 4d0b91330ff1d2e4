use core::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};

use crate::FrameNumber;
use crate::halt::halt;

/// Link value marking the end of a free list.
const NO_LINK: usize = usize::MAX;

/// Holds the metadata for one physical frame.
///
/// The reference count says how many mappings keep the frame alive. The link is only
/// meaningful while the frame sits on a free list, and is only touched by whoever holds
/// that list's lock.
pub struct Frame {
    /// Flags identifying the state of this frame.
    pub flags: FrameFlags,
    /// Number of live references to this frame.
    refcount: AtomicU16,
    /// Frame number of the next free frame, or [`NO_LINK`].
    next: AtomicUsize,
}

impl Frame {
    /// Returns the current reference count.
    pub fn ref_count(&self) -> u16 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Increments the reference count, returning the new value.
    ///
    /// # Panics
    ///
    /// Panics if the count would overflow.
    pub fn acquire(&self) -> u16 {
        let previous = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_add(1)
            })
            .unwrap_or_else(|_| halt(format_args!("frame reference count overflow")));
        previous + 1
    }

    /// Decrements the reference count, returning the new value.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero.
    pub fn release(&self) -> u16 {
        let previous = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .unwrap_or_else(|_| halt(format_args!("frame reference count underflow")));
        previous - 1
    }

    /// Returns the next frame on the free list holding this frame.
    pub(crate) fn next_free(&self) -> Option<FrameNumber> {
        match self.next.load(Ordering::Relaxed) {
            NO_LINK => None,
            next => Some(FrameNumber::new(next)),
        }
    }

    /// Links this frame to `next` on a free list.
    pub(crate) fn set_next_free(&self, next: Option<FrameNumber>) {
        let raw = next.map_or(NO_LINK, FrameNumber::as_usize);
        self.next.store(raw, Ordering::Relaxed);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            flags: FrameFlags::new(),
            refcount: AtomicU16::new(0),
            next: AtomicUsize::new(NO_LINK),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFlag {
    /// Frame sits on a free list.
    Free = 1 << 0,
}

/// Atomic flags for a physical memory frame.
#[derive(Default)]
pub struct FrameFlags(AtomicU64);

impl FrameFlags {
    /// Creates a new `FrameFlags` instance with all flags cleared.
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Tests if the given flag is set.
    pub fn test(&self, flag: FrameFlag) -> bool {
        (self.0.load(Ordering::Acquire) & flag as u64) != 0
    }

    /// Sets the given flag, returning the previous value.
    pub fn test_and_set(&self, flag: FrameFlag) -> bool {
        let mask = flag as u64;
        (self.0.fetch_or(mask, Ordering::AcqRel) & mask) != 0
    }

    /// Clears the given flag, returning the previous value.
    pub fn test_and_clear(&self, flag: FrameFlag) -> bool {
        let mask = flag as u64;
        (self.0.fetch_and(!mask, Ordering::AcqRel) & mask) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_counting() {
        let frame = Frame::default();
        assert_eq!(frame.acquire(), 1);
        assert_eq!(frame.acquire(), 2);
        assert_eq!(frame.release(), 1);
        assert_eq!(frame.release(), 0);
        assert_eq!(frame.ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "frame reference count underflow")]
    fn release_below_zero_halts() {
        Frame::default().release();
    }

    #[test]
    fn flags_test_and_update() {
        let flags = FrameFlags::new();
        assert!(!flags.test_and_set(FrameFlag::Free));
        assert!(flags.test(FrameFlag::Free));
        assert!(flags.test_and_set(FrameFlag::Free));
        assert!(flags.test_and_clear(FrameFlag::Free));
        assert!(!flags.test(FrameFlag::Free));
        assert!(!flags.test_and_clear(FrameFlag::Free));
    }

    #[test]
    fn free_links() {
        let frame = Frame::default();
        assert_eq!(frame.next_free(), None);
        frame.set_next_free(Some(FrameNumber::new(7)));
        assert_eq!(frame.next_free(), Some(FrameNumber::new(7)));
    }
}
