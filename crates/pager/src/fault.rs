//! Page fault resolution.
//!
//! A fault is resolved in one of four ways, checked in order:
//!
//! 1. a store to a copy-on-write page takes the page over, copying it if it is still
//!    shared,
//! 2. a store to a present page of a writable region upgrades the page to writable and
//!    dirty,
//! 3. a first touch inside a region reads the page in from the backing file,
//! 4. a first touch inside the heap maps a zeroed frame.
//!
//! Everything else is fatal for the faulting process.

use crate::{
    AddressSpace, FileError, PAGE_SIZE, PageFlags, PageMapper, PageTableError, Pager,
    PhysicalAddress, Protection, Region, VirtualAddress,
};

/// RISC-V `scause` value of an instruction page fault.
const SCAUSE_INSTRUCTION_PAGE_FAULT: u64 = 12;
/// RISC-V `scause` value of a load page fault.
const SCAUSE_LOAD_PAGE_FAULT: u64 = 13;
/// RISC-V `scause` value of a store/AMO page fault.
const SCAUSE_STORE_PAGE_FAULT: u64 = 15;

/// What the faulting instruction was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    Load,
    Store,
    Instruction,
}

impl FaultCause {
    /// Decodes a RISC-V supervisor trap cause.
    pub const fn from_scause(scause: u64) -> Option<Self> {
        match scause {
            SCAUSE_INSTRUCTION_PAGE_FAULT => Some(Self::Instruction),
            SCAUSE_LOAD_PAGE_FAULT => Some(Self::Load),
            SCAUSE_STORE_PAGE_FAULT => Some(Self::Store),
            _ => None,
        }
    }

    /// Returns the region permission the access needs.
    const fn required(self) -> Protection {
        match self {
            Self::Load => Protection::READ,
            Self::Store => Protection::WRITE,
            Self::Instruction => Protection::EXEC,
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl From<x86_64::structures::idt::PageFaultErrorCode> for FaultCause {
    fn from(code: x86_64::structures::idt::PageFaultErrorCode) -> Self {
        use x86_64::structures::idt::PageFaultErrorCode;

        if code.contains(PageFaultErrorCode::INSTRUCTION_FETCH) {
            Self::Instruction
        } else if code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
            Self::Store
        } else {
            Self::Load
        }
    }
}

/// How a fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A present page was made writable and dirty; no frame was allocated.
    Upgraded,
    /// A region page was read in from its file.
    Loaded { frame: PhysicalAddress },
    /// A heap page was backed by a zeroed frame.
    ZeroFilled { frame: PhysicalAddress },
    /// A shared copy-on-write page was copied into a private frame.
    Copied { frame: PhysicalAddress },
    /// A copy-on-write page had no other users and was made writable in place.
    Unshared,
}

/// Faults that cannot be resolved. The faulting process must be killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    /// The address is outside the user address space.
    #[error("fault at non-user address {0:#x}")]
    InvalidAddress(usize),
    /// No region or heap page covers the address.
    #[error("no mapping covers {0}")]
    NoMapping(VirtualAddress),
    /// The trap cause is not a page fault.
    #[error("unsupported trap cause {0:#x}")]
    UnsupportedCause(u64),
    /// The access is not permitted by the mapping.
    #[error("{cause:?} access to {addr} not permitted")]
    AccessViolation { addr: VirtualAddress, cause: FaultCause },
    /// No frame was available.
    #[error("out of memory")]
    OutOfMemory,
    /// Reading the backing file failed.
    #[error("reading the backing file failed: {0}")]
    ReadFailed(FileError),
    /// The backing file returned fewer bytes than it holds.
    #[error("short read from the backing file")]
    ShortRead,
    /// The page table rejected the new mapping.
    #[error("page table update failed: {0}")]
    MapFailed(#[from] PageTableError),
}

impl Pager<'_> {
    /// Resolves a page fault at `addr` in `space`.
    ///
    /// On success the faulting instruction can be restarted. An error means the process
    /// cannot continue.
    pub fn resolve_fault<P: PageMapper>(
        &self,
        space: &mut AddressSpace<P>,
        addr: usize,
        cause: FaultCause,
    ) -> Result<Resolution, FaultError> {
        let result = self.resolve(space, addr, cause);
        match &result {
            Ok(resolution) => log::trace!("{cause:?} fault at {addr:#x}: {resolution:?}"),
            Err(err) => log::warn!("fatal {cause:?} fault at {addr:#x}: {err}"),
        }
        result
    }

    /// Resolves a fault reported by a RISC-V trap, given `stval` and `scause`.
    pub fn resolve_trap<P: PageMapper>(
        &self,
        space: &mut AddressSpace<P>,
        stval: usize,
        scause: u64,
    ) -> Result<Resolution, FaultError> {
        let Some(cause) = FaultCause::from_scause(scause) else {
            log::warn!("unexpected trap cause {scause:#x} at {stval:#x}");
            return Err(FaultError::UnsupportedCause(scause));
        };
        self.resolve_fault(space, stval, cause)
    }

    fn resolve<P: PageMapper>(
        &self,
        space: &mut AddressSpace<P>,
        addr: usize,
        cause: FaultCause,
    ) -> Result<Resolution, FaultError> {
        let addr = VirtualAddress::try_new(addr)
            .filter(|addr| addr.is_user())
            .ok_or(FaultError::InvalidAddress(addr))?;
        let page = addr.align_down(PAGE_SIZE);
        let present = space.page_table().translate(page);

        if let Some((frame, flags)) = present {
            if cause == FaultCause::Store && flags.is_copy_on_write() {
                return self.break_sharing(space.page_table_mut(), page, frame, flags);
            }
        }

        let heap = space.is_heap_address(addr);
        let (table, regions) = space.split_mut();
        if let Some(region) = regions.find(addr).and_then(|slot| regions.get(slot)) {
            if !region.protection().contains(cause.required()) {
                return Err(FaultError::AccessViolation { addr, cause });
            }
            return match present {
                Some(_) if cause == FaultCause::Store => {
                    table.mark_dirty_writable(page)?;
                    Ok(Resolution::Upgraded)
                }
                Some(_) => Err(FaultError::AccessViolation { addr, cause }),
                None => self.read_in(table, region, page, cause),
            };
        }

        if heap {
            if present.is_some() {
                return Err(FaultError::AccessViolation { addr, cause });
            }
            return self.zero_fill(table, page);
        }
        Err(FaultError::NoMapping(addr))
    }

    /// Backs a region page with a frame holding the file contents.
    fn read_in<P: PageMapper>(
        &self,
        table: &mut P,
        region: &Region,
        page: VirtualAddress,
        cause: FaultCause,
    ) -> Result<Resolution, FaultError> {
        let frame = self.allocate()?;
        let file = region.file();
        let offset = region.file_offset(page);
        let available = file.len().saturating_sub(offset).min(PAGE_SIZE as u64) as usize;

        // SAFETY: the frame was just allocated and is not mapped anywhere.
        let contents = unsafe { self.frames.memory().frame_mut(frame) };
        contents.fill(0);
        let read = match file.read_at(contents, offset) {
            Ok(read) if read >= available => Ok(()),
            Ok(_) => Err(FaultError::ShortRead),
            Err(err) => Err(FaultError::ReadFailed(err)),
        };
        if let Err(err) = read {
            self.frames.release(frame);
            return Err(err);
        }

        self.install(table, page, frame, region.page_flags(cause == FaultCause::Store))?;
        Ok(Resolution::Loaded { frame })
    }

    /// Backs a heap page with a zeroed frame.
    fn zero_fill<P: PageMapper>(
        &self,
        table: &mut P,
        page: VirtualAddress,
    ) -> Result<Resolution, FaultError> {
        let frame = self.allocate()?;
        // SAFETY: the frame was just allocated and is not mapped anywhere.
        unsafe { self.frames.memory().fill(frame, 0) };
        self.install(table, page, frame, PageFlags::user(true, true, false))?;
        Ok(Resolution::ZeroFilled { frame })
    }

    /// Gives the faulting address space a private, writable copy of a shared page.
    ///
    /// The last user of a copy-on-write frame keeps it; everyone else copies. If the
    /// copy cannot be mapped, the shared mapping is put back.
    fn break_sharing<P: PageMapper>(
        &self,
        table: &mut P,
        page: VirtualAddress,
        frame: PhysicalAddress,
        shared: PageFlags,
    ) -> Result<Resolution, FaultError> {
        let mut flags = shared;
        flags.set_copy_on_write(false);
        flags.set_writable(true);
        flags.set_dirty(true);

        if self.frames.ref_count(frame) == 1 {
            table.update_flags(page, flags)?;
            return Ok(Resolution::Unshared);
        }

        let copy = self.allocate()?;
        // SAFETY: `copy` is fresh and the shared frame is read-only in every space.
        unsafe { self.frames.memory().copy_frame(frame, copy) };
        table.unmap(page);
        if let Err(err) = table.map(page, copy, flags) {
            self.frames.release(copy);
            if let Err(restore) = table.map(page, frame, shared) {
                log::warn!("shared page {page} lost its mapping: {restore}");
                self.frames.release(frame);
            }
            return Err(err.into());
        }
        self.frames.release(frame);
        Ok(Resolution::Copied { frame: copy })
    }

    fn allocate(&self) -> Result<PhysicalAddress, FaultError> {
        self.frames.allocate().map_err(|_| FaultError::OutOfMemory)
    }

    /// Maps a freshly filled frame, releasing it if the page table refuses.
    fn install<P: PageMapper>(
        &self,
        table: &mut P,
        page: VirtualAddress,
        frame: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), FaultError> {
        table.map(page, frame, flags).map_err(|err| {
            self.frames.release(frame);
            FaultError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryFile, RefusingDirectory, manager};
    use crate::{AddressSpace, FileRef, MapRequest, PageDirectory, PagerConfig, Sharing};

    fn rw() -> Protection {
        Protection::READ | Protection::WRITE
    }

    fn mapped(
        pager: &Pager<'_>,
        file: FileRef,
        pages: usize,
        prot: Protection,
    ) -> (AddressSpace<PageDirectory>, usize) {
        let mut space = AddressSpace::new(PageDirectory::new(), pager.config());
        let start = pager
            .map_region(&mut space, file, MapRequest::new(pages * PAGE_SIZE, prot, Sharing::Private, 0))
            .unwrap();
        (space, start.as_usize())
    }

    #[test]
    fn decodes_trap_causes() {
        assert_eq!(FaultCause::from_scause(12), Some(FaultCause::Instruction));
        assert_eq!(FaultCause::from_scause(13), Some(FaultCause::Load));
        assert_eq!(FaultCause::from_scause(15), Some(FaultCause::Store));
        assert_eq!(FaultCause::from_scause(8), None);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn decodes_x86_error_codes() {
        use x86_64::structures::idt::PageFaultErrorCode;

        assert_eq!(FaultCause::from(PageFaultErrorCode::USER_MODE), FaultCause::Load);
        assert_eq!(
            FaultCause::from(PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::PROTECTION_VIOLATION),
            FaultCause::Store
        );
        assert_eq!(
            FaultCause::from(PageFaultErrorCode::INSTRUCTION_FETCH),
            FaultCause::Instruction
        );
    }

    #[test]
    fn load_then_store_on_a_private_region() {
        let pmm = manager(4);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let file = MemoryFile::patterned(2, false);
        let (mut space, start) = mapped(&pager, file.clone(), 2, rw());

        let Ok(Resolution::Loaded { frame }) = pager.resolve_fault(&mut space, start, FaultCause::Load) else {
            panic!("load fault was not resolved by reading the file");
        };
        assert_eq!(pmm.allocated_frames(), 1);
        let (mapped, flags) = space.page_table().translate(VirtualAddress::new(start)).unwrap();
        assert_eq!(mapped, frame);
        assert!(flags.is_readable() && !flags.is_writable() && !flags.is_dirty());
        // SAFETY: the frame is mapped only in this test's address space.
        let contents = unsafe { pmm.memory().frame(frame) };
        assert_eq!(contents, &file.contents()[..PAGE_SIZE]);

        assert_eq!(
            pager.resolve_fault(&mut space, start + 16, FaultCause::Store),
            Ok(Resolution::Upgraded)
        );
        assert_eq!(pmm.allocated_frames(), 1);
        let (mapped, flags) = space.page_table().translate(VirtualAddress::new(start)).unwrap();
        assert_eq!(mapped, frame);
        assert!(flags.is_writable() && flags.is_dirty());
    }

    #[test]
    fn repeated_store_faults_allocate_one_frame() {
        let pmm = manager(4);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let (mut space, start) = mapped(&pager, MemoryFile::patterned(1, true), 1, rw());

        pager.resolve_fault(&mut space, start, FaultCause::Load).unwrap();
        pager.resolve_fault(&mut space, start, FaultCause::Store).unwrap();
        pager.resolve_fault(&mut space, start, FaultCause::Store).unwrap();
        assert_eq!(pmm.allocated_frames(), 1);
    }

    #[test]
    fn first_touch_store_maps_writable_and_dirty() {
        let pmm = manager(2);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let (mut space, start) = mapped(&pager, MemoryFile::patterned(1, true), 1, rw());

        assert!(matches!(
            pager.resolve_fault(&mut space, start, FaultCause::Store),
            Ok(Resolution::Loaded { .. })
        ));
        let (_, flags) = space.page_table().translate(VirtualAddress::new(start)).unwrap();
        assert!(flags.is_writable() && flags.is_dirty());
    }

    #[test]
    fn reads_past_end_of_file_are_zero_filled() {
        let pmm = manager(2);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let file = MemoryFile::new(&[9; 100], false);
        let (mut space, start) = mapped(&pager, file, 2, Protection::READ);

        let Ok(Resolution::Loaded { frame }) = pager.resolve_fault(&mut space, start, FaultCause::Load) else {
            panic!("load fault was not resolved");
        };
        // SAFETY: the frame is mapped only in this test's address space.
        let contents = unsafe { pmm.memory().frame(frame) };
        assert!(contents[..100].iter().all(|&b| b == 9));
        assert!(contents[100..].iter().all(|&b| b == 0));

        let Ok(Resolution::Loaded { frame }) =
            pager.resolve_fault(&mut space, start + PAGE_SIZE, FaultCause::Load)
        else {
            panic!("load fault past the end was not resolved");
        };
        // SAFETY: as above.
        assert!(unsafe { pmm.memory().frame(frame) }.iter().all(|&b| b == 0));
    }

    #[test]
    fn failed_reads_release_the_frame() {
        let pmm = manager(2);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let (mut space, start) = mapped(&pager, MemoryFile::unreadable(PAGE_SIZE), 1, Protection::READ);

        assert_eq!(
            pager.resolve_fault(&mut space, start, FaultCause::Load),
            Err(FaultError::ReadFailed(FileError::Io))
        );
        assert_eq!(pmm.allocated_frames(), 0);
        assert!(!space.page_table().is_present(VirtualAddress::new(start)));
    }

    #[test]
    fn permission_and_range_failures_are_fatal() {
        let pmm = manager(2);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let (mut space, start) = mapped(&pager, MemoryFile::patterned(1, false), 1, Protection::READ);
        let addr = VirtualAddress::new(start);

        assert_eq!(
            pager.resolve_fault(&mut space, start, FaultCause::Store),
            Err(FaultError::AccessViolation { addr, cause: FaultCause::Store })
        );
        assert_eq!(
            pager.resolve_fault(&mut space, start, FaultCause::Instruction),
            Err(FaultError::AccessViolation { addr, cause: FaultCause::Instruction })
        );
        assert_eq!(
            pager.resolve_fault(&mut space, start + PAGE_SIZE, FaultCause::Load),
            Err(FaultError::NoMapping(addr + PAGE_SIZE))
        );
        assert_eq!(
            pager.resolve_fault(&mut space, usize::MAX, FaultCause::Load),
            Err(FaultError::InvalidAddress(usize::MAX))
        );
        assert_eq!(
            pager.resolve_trap(&mut space, start, 2),
            Err(FaultError::UnsupportedCause(2))
        );

        // A second load of a present page means the page table is out of sync.
        pager.resolve_trap(&mut space, start, 13).unwrap();
        assert_eq!(
            pager.resolve_fault(&mut space, start, FaultCause::Load),
            Err(FaultError::AccessViolation { addr, cause: FaultCause::Load })
        );
        assert_eq!(pmm.allocated_frames(), 1);
    }

    #[test]
    fn exhaustion_is_fatal() {
        let pmm = manager(1);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let (mut space, start) = mapped(&pager, MemoryFile::patterned(2, false), 2, Protection::READ);

        pager.resolve_fault(&mut space, start, FaultCause::Load).unwrap();
        assert_eq!(
            pager.resolve_fault(&mut space, start + PAGE_SIZE, FaultCause::Load),
            Err(FaultError::OutOfMemory)
        );
    }

    #[test]
    fn heap_pages_fault_in_zeroed() {
        let pmm = manager(2);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let mut space = AddressSpace::with_size(PageDirectory::new(), &config, 4 * PAGE_SIZE);
        space.set_stack_pointer(PAGE_SIZE + 8);

        let Ok(Resolution::ZeroFilled { frame }) =
            pager.resolve_fault(&mut space, 3 * PAGE_SIZE + 5, FaultCause::Store)
        else {
            panic!("heap fault was not zero-filled");
        };
        // SAFETY: the frame is mapped only in this test's address space.
        assert!(unsafe { pmm.memory().frame(frame) }.iter().all(|&b| b == 0));
        let (_, flags) = space.page_table().translate(VirtualAddress::new(3 * PAGE_SIZE)).unwrap();
        assert!(flags.is_readable() && flags.is_writable() && flags.is_user());

        // Below the stack page, and at the heap end.
        assert!(matches!(
            pager.resolve_fault(&mut space, PAGE_SIZE - 1, FaultCause::Load),
            Err(FaultError::NoMapping(_))
        ));
        assert!(matches!(
            pager.resolve_fault(&mut space, 4 * PAGE_SIZE, FaultCause::Load),
            Err(FaultError::NoMapping(_))
        ));
        assert_eq!(pmm.allocated_frames(), 1);
    }

    #[test]
    fn copy_on_write_copies_shared_frames() {
        let pmm = manager(4);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let mut parent = AddressSpace::with_size(PageDirectory::new(), &config, PAGE_SIZE);
        let page = VirtualAddress::new(0);

        let Ok(Resolution::ZeroFilled { frame }) = pager.resolve_fault(&mut parent, 0, FaultCause::Store) else {
            panic!("heap fault was not zero-filled");
        };
        // SAFETY: the frame is mapped only in the parent.
        unsafe { pmm.memory().frame_mut(frame)[..4].copy_from_slice(b"cow!") };

        let mut child = AddressSpace::new(PageDirectory::new(), &config);
        pager.duplicate(&mut parent, &mut child).unwrap();
        assert_eq!(pmm.ref_count(frame), 2);

        let Ok(Resolution::Copied { frame: copy }) = pager.resolve_fault(&mut child, 0, FaultCause::Store) else {
            panic!("store to a shared page was not copied");
        };
        assert_ne!(copy, frame);
        assert_eq!(pmm.ref_count(frame), 1);
        assert_eq!(pmm.ref_count(copy), 1);
        // SAFETY: each frame is mapped in one address space.
        assert_eq!(unsafe { &pmm.memory().frame(copy)[..4] }, b"cow!");
        let (_, flags) = child.page_table().translate(page).unwrap();
        assert!(flags.is_writable() && !flags.is_copy_on_write());

        // The parent is now the only user and keeps its frame.
        assert_eq!(
            pager.resolve_fault(&mut parent, 0, FaultCause::Store),
            Ok(Resolution::Unshared)
        );
        let (mapped, flags) = parent.page_table().translate(page).unwrap();
        assert_eq!(mapped, frame);
        assert!(flags.is_writable() && !flags.is_copy_on_write());
        assert_eq!(pmm.allocated_frames(), 2);

        // Loads from a copy-on-write page never reach the resolver in practice.
        let mut grandchild = AddressSpace::new(PageDirectory::new(), &config);
        pager.duplicate(&mut parent, &mut grandchild).unwrap();
        assert!(matches!(
            pager.resolve_fault(&mut grandchild, 0, FaultCause::Load),
            Err(FaultError::AccessViolation { .. })
        ));
    }

    #[test]
    fn copy_on_write_map_failure_keeps_the_shared_page() {
        let pmm = manager(4);
        let config = PagerConfig::default();
        let pager = Pager::new(&pmm, &config);
        let mut parent = AddressSpace::with_size(PageDirectory::new(), &config, PAGE_SIZE);
        let page = VirtualAddress::new(0);

        let Ok(Resolution::ZeroFilled { frame }) = pager.resolve_fault(&mut parent, 0, FaultCause::Store) else {
            panic!("heap fault was not zero-filled");
        };
        let mut child = AddressSpace::new(RefusingDirectory::default(), &config);
        pager.duplicate(&mut parent, &mut child).unwrap();
        let shared = child.page_table().translate(page).unwrap();

        // The copy is refused; the shared mapping comes back.
        child.page_table_mut().refusals = 1;
        assert_eq!(
            pager.resolve_fault(&mut child, 0, FaultCause::Store),
            Err(FaultError::MapFailed(PageTableError::OutOfMemory))
        );
        assert_eq!(child.page_table().translate(page), Some(shared));
        assert_eq!(pmm.ref_count(frame), 2);
        assert_eq!(pmm.allocated_frames(), 1);

        // Both the copy and the shared mapping are refused.
        child.page_table_mut().refusals = 2;
        assert_eq!(
            pager.resolve_fault(&mut child, 0, FaultCause::Store),
            Err(FaultError::MapFailed(PageTableError::OutOfMemory))
        );
        assert!(!child.page_table().is_present(page));
        assert_eq!(pmm.ref_count(frame), 1);
        assert_eq!(pmm.allocated_frames(), 1);
    }
}
