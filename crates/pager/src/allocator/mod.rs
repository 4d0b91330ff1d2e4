//! Free-frame pools.
//!
//! A pool holds the frames that currently have no references. Two policies implement
//! the same [`FreeFrames`] interface and are picked once, when the
//! [`PhysicalMemoryManager`](crate::PhysicalMemoryManager) is built:
//!
//! - [`SingleFreeList`]: one list behind one lock.
//! - [`PerCpuFreeLists`]: one list per CPU; a CPU whose list runs dry steals the front
//!   half of another CPU's list.
//!
//! Pools never store pointers inside free frames. Lists are threaded through the
//! frame descriptors of the [`FrameTable`], by frame number.

mod free_list;
mod per_cpu;
mod single;

use alloc::boxed::Box;

use crate::{FrameNumber, FrameTable};

pub(crate) use free_list::FreeList;
pub use per_cpu::PerCpuFreeLists;
pub use single::SingleFreeList;

/// Errors that can occur during frame allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Every free list in the system is empty.
    #[error("out of physical memory")]
    OutOfMemory,
}

/// Selects the free-frame pool used by the physical memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorPolicy {
    /// One free list guarded by one lock.
    #[default]
    SingleList,
    /// One free list per CPU with work stealing.
    PerCpu { cpus: usize },
}

impl AllocatorPolicy {
    /// Builds an empty pool for this policy.
    pub fn build(self) -> Box<dyn FreeFrames> {
        match self {
            Self::SingleList => Box::new(SingleFreeList::new()),
            Self::PerCpu { cpus } => Box::new(PerCpuFreeLists::new(cpus.max(1))),
        }
    }
}

/// A pool of free frames.
///
/// Implementations only move frame numbers around; reference counts, poisoning and
/// range checks are the manager's job.
pub trait FreeFrames: Send + Sync {
    /// Returns a frame to the pool on behalf of `cpu`.
    fn push(&self, table: &FrameTable, cpu: usize, frame: FrameNumber);

    /// Takes a frame from the pool on behalf of `cpu`.
    fn pop(&self, table: &FrameTable, cpu: usize) -> Option<FrameNumber>;

    /// Returns the total number of free frames.
    fn free_frames(&self) -> usize;

    /// Returns the number of free frames held for `cpu`.
    fn free_frames_on(&self, cpu: usize) -> usize;
}
