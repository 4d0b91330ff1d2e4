//! Physical memory manager for single frames.
//!
//! The manager owns every frame in its managed range. It combines three things that
//! must never disagree:
//!
//! - the [`FrameTable`], holding one reference count per frame,
//! - a [`FreeFrames`] pool, holding every frame whose count is zero,
//! - the frame bytes, reached through [`PhysicalMemory`].
//!
//! A managed frame is either allocated with a count of at least one, or free with a
//! count of zero and sitting in the pool, never both. Anything that would break this
//! (freeing a frame twice, freeing a frame the manager never owned) halts the system.

use alloc::boxed::Box;

use crate::allocator::{AllocError, AllocatorPolicy, FreeFrames};
use crate::halt::halt;
use crate::{FrameFlag, FrameTable, PhysicalAddress, PhysicalMemory};

/// Byte written over every frame as it is freed, so stale users read obvious junk.
pub const JUNK_ON_FREE: u8 = 0x01;

/// Byte written over every frame as it is handed out.
pub const JUNK_ON_ALLOC: u8 = 0x05;

/// Default current-CPU query for uniprocessor configurations.
fn boot_cpu() -> usize {
    0
}

/// Allocates and reclaims whole physical frames.
pub struct PhysicalMemoryManager {
    memory: PhysicalMemory,
    frames: FrameTable,
    free: Box<dyn FreeFrames>,
    current_cpu: fn() -> usize,
}

impl PhysicalMemoryManager {
    /// Creates a manager for the frames in `[start, end)` and seeds them into its pool.
    ///
    /// `start` is typically the first address after the kernel image; nothing below it
    /// is ever handed out or accepted back.
    pub fn new(
        memory: PhysicalMemory,
        start: PhysicalAddress,
        end: PhysicalAddress,
        policy: AllocatorPolicy,
    ) -> Self {
        Self::with_cpu_id(memory, start, end, policy, boot_cpu)
    }

    /// Like [`new`](Self::new), with a hook that reports which CPU is running.
    ///
    /// The hook must be stable for the duration of one call into the manager, which
    /// holds as long as the caller runs with preemption disabled.
    pub fn with_cpu_id(
        memory: PhysicalMemory,
        start: PhysicalAddress,
        end: PhysicalAddress,
        policy: AllocatorPolicy,
        current_cpu: fn() -> usize,
    ) -> Self {
        let manager = Self {
            memory,
            frames: FrameTable::new(start, end),
            free: policy.build(),
            current_cpu,
        };
        manager.seed();

        let (first, last) = manager.frames.range();
        log::info!(
            "managing {} frames in [{first}, {last}) with {policy:?}",
            manager.frames.len()
        );
        manager
    }

    /// Places every managed frame on a free list, exactly once.
    ///
    /// Each frame's count goes to one first so that the release below brings it back
    /// to zero instead of underflowing.
    fn seed(&self) {
        for number in self.frames.frame_numbers() {
            let frame = number.start();
            self.frames.increment(frame);
            self.release(frame);
        }
    }

    /// Allocates one frame on the current CPU.
    ///
    /// The returned frame has a reference count of one and is filled with junk.
    pub fn allocate(&self) -> Result<PhysicalAddress, AllocError> {
        self.allocate_on((self.current_cpu)())
    }

    /// Allocates one frame on behalf of `cpu`.
    pub fn allocate_on(&self, cpu: usize) -> Result<PhysicalAddress, AllocError> {
        let Some(number) = self.free.pop(&self.frames, cpu) else {
            log::trace!("cpu {cpu}: out of physical memory");
            return Err(AllocError::OutOfMemory);
        };
        let frame = number.start();
        let Some(entry) = self.frames.descriptor(number) else {
            halt(format_args!("free pool handed out unmanaged frame {frame}"));
        };

        if !entry.flags.test_and_clear(FrameFlag::Free) {
            halt(format_args!("frame {frame} was on a free list but not marked free"));
        }
        let refs = entry.acquire();
        if refs != 1 {
            halt(format_args!("free frame {frame} had {} live references", refs - 1));
        }

        // SAFETY: the frame just left the pool and no mapping refers to it yet.
        unsafe { self.memory.fill(frame, JUNK_ON_ALLOC) };
        log::trace!("cpu {cpu}: allocated frame {frame}");
        Ok(frame)
    }

    /// Drops one reference to `frame` on the current CPU, freeing it at zero.
    ///
    /// # Panics
    ///
    /// Halts if the frame is unaligned, outside the managed range, or already free.
    pub fn release(&self, frame: PhysicalAddress) {
        self.release_on((self.current_cpu)(), frame);
    }

    /// Drops one reference to `frame` on behalf of `cpu`.
    ///
    /// When the last reference goes, the frame is poisoned and pushed onto `cpu`'s
    /// free list, whichever CPU allocated it.
    pub fn release_on(&self, cpu: usize, frame: PhysicalAddress) {
        self.drop_reference(cpu, frame);
    }

    /// Adds a reference to `frame`, for sharing it between address spaces.
    ///
    /// Frames outside the managed range are not reference counted; this is a no-op.
    pub fn increment_ref(&self, frame: PhysicalAddress) {
        self.frames.increment(frame);
    }

    /// Drops a reference to `frame`, returning the number left.
    ///
    /// A return of zero means the frame went back to the free pool.
    pub fn decrement_ref(&self, frame: PhysicalAddress) -> u16 {
        self.drop_reference((self.current_cpu)(), frame)
    }

    fn drop_reference(&self, cpu: usize, frame: PhysicalAddress) -> u16 {
        if !frame.is_page_aligned() {
            halt(format_args!("release of unaligned frame {frame}"));
        }
        let Some(entry) = self.frames.frame(frame) else {
            halt(format_args!("release of unmanaged frame {frame}"));
        };
        if entry.flags.test(FrameFlag::Free) {
            halt(format_args!("release of free frame {frame}"));
        }

        let remaining = entry.release();
        if remaining > 0 {
            return remaining;
        }

        if entry.flags.test_and_set(FrameFlag::Free) {
            halt(format_args!("frame {frame} freed twice"));
        }
        // SAFETY: the last reference is gone, so nothing maps or reads the frame.
        unsafe { self.memory.fill(frame, JUNK_ON_FREE) };
        self.free.push(&self.frames, cpu, frame.frame_number());
        0
    }

    /// Returns the reference count of `frame`, or zero if it is not managed.
    pub fn ref_count(&self, frame: PhysicalAddress) -> u16 {
        self.frames.ref_count(frame)
    }

    /// Returns the total number of managed frames.
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames in the free pool.
    pub fn free_frames(&self) -> usize {
        self.free.free_frames()
    }

    /// Returns the number of free frames held for `cpu`.
    pub fn free_frames_on(&self, cpu: usize) -> usize {
        self.free.free_frames_on(cpu)
    }

    /// Returns the number of frames currently handed out.
    pub fn allocated_frames(&self) -> usize {
        self.total_frames() - self.free_frames()
    }

    /// Returns the frame table.
    pub fn frame_table(&self) -> &FrameTable {
        &self.frames
    }

    /// Returns the translator for frame contents.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }
}
