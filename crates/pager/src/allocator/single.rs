use spin::Mutex;

use super::{FreeFrames, FreeList};
use crate::{FrameNumber, FrameTable};

/// A single free list behind one lock.
///
/// Every CPU contends on the same lock, which is fine until the system has more than
/// a handful of cores allocating at once.
pub struct SingleFreeList {
    list: Mutex<FreeList>,
}

impl SingleFreeList {
    /// Creates an empty pool.
    pub const fn new() -> Self {
        Self {
            list: Mutex::new(FreeList::new()),
        }
    }
}

impl Default for SingleFreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeFrames for SingleFreeList {
    fn push(&self, table: &FrameTable, _cpu: usize, frame: FrameNumber) {
        self.list.lock().push(table, frame);
    }

    fn pop(&self, table: &FrameTable, _cpu: usize) -> Option<FrameNumber> {
        self.list.lock().pop(table)
    }

    fn free_frames(&self) -> usize {
        self.list.lock().len()
    }

    fn free_frames_on(&self, _cpu: usize) -> usize {
        self.free_frames()
    }
}
