//! Access to the bytes of physical frames.
//!
//! The kernel reaches physical memory through its direct map. In software emulation
//! a heap buffer stands in for RAM, placed at a configurable physical base so that
//! frame addresses look like the ones the hardware would hand out.

use core::ptr;

use crate::{PAGE_SIZE, PhysicalAddress};

/// Translates frame addresses into accessible memory.
pub enum PhysicalMemory {
    /// All physical memory is mapped at a fixed offset in the kernel's address space.
    DirectMap { offset: usize },
    /// Emulated physical memory backed by a heap buffer.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl PhysicalMemory {
    /// Creates a translator for a direct map at the given virtual offset.
    pub const fn direct_map(offset: usize) -> Self {
        Self::DirectMap { offset }
    }

    /// Creates `size` bytes of emulated physical memory starting at `base`.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(base: PhysicalAddress, size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(base, size))
    }

    /// Returns a pointer to the first byte of the frame at `frame`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not page-aligned, or lies outside emulated memory.
    pub fn frame_ptr(&self, frame: PhysicalAddress) -> *mut u8 {
        assert!(frame.is_page_aligned(), "frame address must be page-aligned");
        match self {
            Self::DirectMap { offset } => frame.as_usize().wrapping_add(*offset) as *mut u8,
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(memory) => memory.translate(frame),
        }
    }

    /// Returns the contents of a frame.
    ///
    /// # Safety
    ///
    /// No one may write to the frame while the returned slice is alive.
    pub unsafe fn frame(&self, frame: PhysicalAddress) -> &[u8] {
        // SAFETY: frame_ptr points at PAGE_SIZE accessible bytes; the caller rules out writers.
        unsafe { core::slice::from_raw_parts(self.frame_ptr(frame), PAGE_SIZE) }
    }

    /// Returns the contents of a frame for writing.
    ///
    /// # Safety
    ///
    /// The caller must own the frame exclusively (freshly allocated, or unmapped from
    /// every address space) for as long as the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_mut(&self, frame: PhysicalAddress) -> &mut [u8] {
        // SAFETY: frame_ptr points at PAGE_SIZE accessible bytes; the caller owns them.
        unsafe { core::slice::from_raw_parts_mut(self.frame_ptr(frame), PAGE_SIZE) }
    }

    /// Overwrites a whole frame with `byte`.
    ///
    /// # Safety
    ///
    /// Same contract as [`frame_mut`](Self::frame_mut).
    pub unsafe fn fill(&self, frame: PhysicalAddress, byte: u8) {
        // SAFETY: see frame_mut.
        unsafe { ptr::write_bytes(self.frame_ptr(frame), byte, PAGE_SIZE) }
    }

    /// Copies the contents of `from` into `to`.
    ///
    /// # Safety
    ///
    /// The caller must own `to` exclusively and no one may write to `from`.
    pub unsafe fn copy_frame(&self, from: PhysicalAddress, to: PhysicalAddress) {
        assert_ne!(from, to, "cannot copy a frame onto itself");
        // SAFETY: distinct frames never overlap; ownership is the caller's contract.
        unsafe { ptr::copy_nonoverlapping(self.frame_ptr(from), self.frame_ptr(to), PAGE_SIZE) }
    }
}

/// Emulated physical memory for running the pager on a host.
#[cfg(any(test, feature = "software-emulation"))]
pub struct EmulatedMemory {
    /// Physical address of the first emulated byte.
    base: PhysicalAddress,
    /// The buffer standing in for RAM, leaked from a `Box<[u8]>` and reclaimed on drop.
    memory: ptr::NonNull<[u8]>,
}

// SAFETY: the buffer is only reached through raw pointers whose use is governed by
// frame ownership, exactly like real physical memory.
#[cfg(any(test, feature = "software-emulation"))]
unsafe impl Send for EmulatedMemory {}
#[cfg(any(test, feature = "software-emulation"))]
unsafe impl Sync for EmulatedMemory {}

#[cfg(any(test, feature = "software-emulation"))]
impl EmulatedMemory {
    /// Creates a zeroed emulated memory region of `size` bytes at `base`.
    pub fn new(base: PhysicalAddress, size: usize) -> Self {
        let buffer = alloc::vec![0u8; size].into_boxed_slice();
        let memory = ptr::NonNull::from(alloc::boxed::Box::leak(buffer));
        Self { base, memory }
    }

    /// Translates a physical address into a pointer into the buffer.
    pub fn translate(&self, phys: PhysicalAddress) -> *mut u8 {
        let offset = phys
            .as_usize()
            .checked_sub(self.base.as_usize())
            .expect("physical address below emulated memory");
        assert!(
            offset + PAGE_SIZE <= self.size(),
            "physical address beyond emulated memory"
        );
        // SAFETY: offset was bounds-checked against the buffer length above.
        unsafe { self.memory.cast::<u8>().as_ptr().add(offset) }
    }

    /// Returns the physical address of the first emulated byte.
    pub fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Returns the size of the emulated region in bytes.
    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: the pointer came from Box::leak in new() and is released exactly once.
        drop(unsafe { alloc::boxed::Box::from_raw(self.memory.as_ptr()) });
    }
}
