//! The pager: lazy heap growth, fork-time sharing and teardown.
//!
//! Mapping regions live in [`mmap`](crate::mmap) and fault resolution in
//! [`fault`](crate::fault); both extend [`Pager`].

use crate::{
    AddressSpace, PAGE_SIZE, PageMapper, PageTableError, PagerConfig, PhysicalMemoryManager,
    VirtualAddress, page_round_down, page_round_up,
};

/// Errors returned when resizing the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GrowError {
    /// The new size does not fit in an address.
    #[error("heap size overflow")]
    Overflow,
    /// The new size passes the configured heap limit.
    #[error("heap would end at {requested:#x}, past the limit {limit:#x}")]
    LimitExceeded { requested: usize, limit: usize },
    /// The heap would shrink into the page holding the user stack.
    #[error("heap would shrink below the stack")]
    BelowStack,
}

/// Errors returned when duplicating an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ForkError {
    /// The child address space already holds mappings.
    #[error("child address space is not empty")]
    NotEmpty,
    /// A shared page could not be mapped into the child.
    #[error("failed to share page: {0}")]
    MapFailed(#[from] PageTableError),
}

/// Resolves faults and maintains the memory layout of user address spaces.
///
/// The pager holds no state of its own. Callers serialize operations on one address
/// space through the `&mut` borrow; different address spaces may be handled from
/// different CPUs at once, sharing the frame manager.
#[derive(Clone, Copy)]
pub struct Pager<'a> {
    pub(crate) frames: &'a PhysicalMemoryManager,
    pub(crate) config: &'a PagerConfig,
}

impl<'a> Pager<'a> {
    /// Creates a pager drawing frames from `frames`.
    pub fn new(frames: &'a PhysicalMemoryManager, config: &'a PagerConfig) -> Self {
        Self { frames, config }
    }

    /// Returns the frame manager backing this pager.
    pub fn frames(&self) -> &'a PhysicalMemoryManager {
        self.frames
    }

    /// Returns the pager configuration.
    pub fn config(&self) -> &'a PagerConfig {
        self.config
    }

    /// Grows or shrinks the heap by `delta` bytes and returns the previous size.
    ///
    /// Growing only moves the bound; pages are committed when first touched. Shrinking
    /// unmaps and releases every page past the new end right away.
    pub fn grow<P: PageMapper>(
        &self,
        space: &mut AddressSpace<P>,
        delta: isize,
    ) -> Result<usize, GrowError> {
        let old = space.size();
        let new = old
            .checked_add_signed(delta)
            .ok_or(if delta < 0 { GrowError::BelowStack } else { GrowError::Overflow })?;

        if delta >= 0 {
            if new > self.config.heap_limit {
                return Err(GrowError::LimitExceeded {
                    requested: new,
                    limit: self.config.heap_limit,
                });
            }
        } else {
            // A stack pointer in the last page has no page above it.
            let stack_top = space
                .stack_pointer()
                .checked_add(PAGE_SIZE - 1)
                .map(page_round_down)
                .ok_or(GrowError::BelowStack)?;
            if new < stack_top {
                return Err(GrowError::BelowStack);
            }
            let released =
                self.unmap_pages(space.page_table_mut(), page_round_up(new), page_round_up(old));
            log::trace!("heap shrink released {released} frames");
        }

        space.set_size(new);
        log::debug!("heap resized from {old:#x} to {new:#x}");
        Ok(old)
    }

    /// Copies `parent`'s layout into the empty `child`.
    ///
    /// Regions are duplicated along with their file handles; their pages fault in again
    /// from the file in the child. Heap pages are shared: writable ones turn read-only
    /// and copy-on-write in both spaces, and each shared frame gains a reference.
    pub fn duplicate<P: PageMapper, Q: PageMapper>(
        &self,
        parent: &mut AddressSpace<P>,
        child: &mut AddressSpace<Q>,
    ) -> Result<(), ForkError> {
        if !child.regions().is_empty() || child.size() != 0 {
            return Err(ForkError::NotEmpty);
        }

        *child.regions_mut() = parent.regions().clone();
        child.set_size(parent.size());
        child.set_stack_pointer(parent.stack_pointer());

        let mut shared = 0;
        for addr in (0..page_round_up(parent.size())).step_by(PAGE_SIZE) {
            let page = VirtualAddress::new(addr);
            let Some((frame, mut flags)) = parent.page_table().translate(page) else {
                continue;
            };
            if flags.is_writable() || flags.is_copy_on_write() {
                flags.set_writable(false);
                flags.set_copy_on_write(true);
                parent.page_table_mut().update_flags(page, flags)?;
            }

            self.frames.increment_ref(frame);
            if let Err(err) = child.page_table_mut().map(page, frame, flags) {
                self.frames.release(frame);
                return Err(err.into());
            }
            shared += 1;
        }

        log::debug!(
            "duplicated {} regions and shared {shared} heap pages",
            child.regions().len()
        );
        Ok(())
    }

    /// Tears down an address space: unmaps every region, writing back shared dirty
    /// pages, and releases every heap page.
    ///
    /// The page table itself stays with the caller.
    pub fn release<P: PageMapper>(&self, space: &mut AddressSpace<P>) {
        for slot in 0..space.regions().capacity() {
            let (table, regions) = space.split_mut();
            if let Some(region) = regions.remove(slot) {
                self.tear_down_region(table, &region);
            }
        }

        let end = page_round_up(space.size());
        let released = self.unmap_pages(space.page_table_mut(), 0, end);
        space.set_size(0);
        log::debug!("address space released, {released} heap frames freed");
    }

    /// Unmaps every present page in `[start, end)` and drops a reference to its frame.
    ///
    /// Returns how many pages were unmapped.
    pub(crate) fn unmap_pages<P: PageMapper>(&self, table: &mut P, start: usize, end: usize) -> usize {
        debug_assert!(start % PAGE_SIZE == 0 && end % PAGE_SIZE == 0);
        let mut count = 0;
        for addr in (start..end).step_by(PAGE_SIZE) {
            if let Some(frame) = table.unmap(VirtualAddress::new(addr)) {
                self.frames.release(frame);
                count += 1;
            }
        }
        count
    }
}
