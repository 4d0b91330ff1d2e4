use alloc::boxed::Box;

use spin::Mutex;

use super::{FreeFrames, FreeList, free_list::Chain};
use crate::{FrameNumber, FrameTable};

/// One free list per CPU.
///
/// Allocation pops from the calling CPU's list. When that list is empty the CPU scans
/// the others in round-robin order, starting with its right neighbour, and steals the
/// front half of the first non-empty one. Taking half rather than a single frame means
/// the thief can serve many more allocations locally before it has to steal again.
///
/// Frees always go to the freeing CPU's own list, never back to the CPU the frame was
/// stolen from.
///
/// At most one list lock is held at a time: the victim's lock is dropped before the
/// thief's own list is touched.
pub struct PerCpuFreeLists {
    lists: Box<[Mutex<FreeList>]>,
}

impl PerCpuFreeLists {
    /// Creates empty lists for `cpus` CPUs.
    ///
    /// # Panics
    ///
    /// Panics if `cpus` is zero.
    pub fn new(cpus: usize) -> Self {
        assert!(cpus > 0, "per-CPU allocator needs at least one CPU");
        Self {
            lists: (0..cpus).map(|_| Mutex::new(FreeList::new())).collect(),
        }
    }

    fn list(&self, cpu: usize) -> &Mutex<FreeList> {
        &self.lists[cpu % self.lists.len()]
    }

    /// Detaches the front half of the first non-empty list after `thief`.
    fn steal(&self, table: &FrameTable, thief: usize) -> Option<Chain> {
        let cpus = self.lists.len();
        (1..cpus)
            .map(|step| (thief + step) % cpus)
            .find_map(|victim| {
                let chain = self.lists[victim].lock().split_front_half(table)?;
                log::trace!(
                    "cpu {thief} stole {} free frames from cpu {victim}",
                    chain.len()
                );
                Some(chain)
            })
    }
}

impl FreeFrames for PerCpuFreeLists {
    fn push(&self, table: &FrameTable, cpu: usize, frame: FrameNumber) {
        self.list(cpu).lock().push(table, frame);
    }

    fn pop(&self, table: &FrameTable, cpu: usize) -> Option<FrameNumber> {
        let cpu = cpu % self.lists.len();
        if let Some(frame) = self.list(cpu).lock().pop(table) {
            return Some(frame);
        }

        let (frame, rest) = self.steal(table, cpu)?.take_first(table);
        if let Some(rest) = rest {
            self.list(cpu).lock().splice(table, rest);
        }
        Some(frame)
    }

    fn free_frames(&self) -> usize {
        self.lists.iter().map(|list| list.lock().len()).sum()
    }

    fn free_frames_on(&self, cpu: usize) -> usize {
        self.list(cpu).lock().len()
    }
}
