//! Memory-mapped files.
//!
//! Mapping only records a region; frames are read in by the fault resolver. Unmapping
//! writes shared dirty pages back to the file, drops the pages and trims the region.

use crate::file::Transaction;
use crate::halt::halt;
use crate::{
    AddressSpace, FileError, FileRef, PAGE_SIZE, PageMapper, Pager, Protection, Region,
    Sharing, VirtualAddress, page_round_up,
};

/// Share stores with the file and other mappings.
pub const MAP_SHARED: i32 = 0x01;
/// Keep stores private to the address space.
pub const MAP_PRIVATE: i32 = 0x02;

/// Pages may be read.
pub const PROT_READ: i32 = 0x1;
/// Pages may be written.
pub const PROT_WRITE: i32 = 0x2;
/// Pages may be executed.
pub const PROT_EXEC: i32 = 0x4;

/// Errors returned by [`Pager::map_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// A length or offset was negative, or the sharing mode unknown.
    #[error("invalid mapping arguments")]
    InvalidArgument,
    /// A writable shared mapping was requested on a file not open for writing.
    #[error("file is not writable")]
    ReadOnlyFile,
    /// The file offset is not page-aligned.
    #[error("file offset is not page-aligned")]
    UnalignedOffset,
    /// The mapping would be empty.
    #[error("mapping length is zero")]
    EmptyLength,
    /// Every region slot is taken.
    #[error("no free region slot")]
    NoFreeSlot,
    /// The mapping does not fit below the reserved top of the address space.
    #[error("mapping does not fit in the address space")]
    NoSpace,
}

/// Errors returned by [`Pager::unmap_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnmapError {
    /// The address, or the end of a prefix, is not page-aligned.
    #[error("unmap range is not page-aligned")]
    Unaligned,
    /// No single region covers the range.
    #[error("range is not covered by one mapping")]
    NotMapped,
    /// Writing a dirty page back failed.
    #[error("write-back failed: {0}")]
    WriteBack(#[from] FileError),
    /// The file accepted fewer bytes than written back.
    #[error("short write-back")]
    ShortWrite,
}

/// The arguments of a map request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Length of the mapping in bytes.
    pub length: usize,
    /// Access permissions.
    pub prot: Protection,
    /// Sharing mode.
    pub sharing: Sharing,
    /// File offset of the first mapped byte.
    pub offset: u64,
}

impl MapRequest {
    /// Creates a map request.
    pub const fn new(length: usize, prot: Protection, sharing: Sharing, offset: u64) -> Self {
        Self {
            length,
            prot,
            sharing,
            offset,
        }
    }

    /// Decodes the system call arguments of `mmap`.
    ///
    /// Unknown protection bits are ignored; the sharing flag must be exactly one of
    /// [`MAP_SHARED`] and [`MAP_PRIVATE`].
    pub fn from_raw(length: i64, prot: i32, flags: i32, offset: i64) -> Result<Self, MapError> {
        let sharing = match flags {
            MAP_SHARED => Sharing::Shared,
            MAP_PRIVATE => Sharing::Private,
            _ => return Err(MapError::InvalidArgument),
        };
        let length = usize::try_from(length).map_err(|_| MapError::InvalidArgument)?;
        let offset = u64::try_from(offset).map_err(|_| MapError::InvalidArgument)?;

        let mut protection = Protection::NONE;
        for (bit, perm) in [
            (PROT_READ, Protection::READ),
            (PROT_WRITE, Protection::WRITE),
            (PROT_EXEC, Protection::EXEC),
        ] {
            if prot & bit != 0 {
                protection = protection | perm;
            }
        }
        Ok(Self::new(length, protection, sharing, offset))
    }
}

/// How an unmap changes the region it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trim {
    Whole,
    Front,
    Back,
}

impl Pager<'_> {
    /// Maps `file` into `space` and returns the start of the new region.
    ///
    /// The region is placed above every existing region, at or above the configured
    /// mapping base. No frame is touched; the region holds a reference to the file
    /// until it is fully unmapped.
    pub fn map_region<P: PageMapper>(
        &self,
        space: &mut AddressSpace<P>,
        file: FileRef,
        request: MapRequest,
    ) -> Result<VirtualAddress, MapError> {
        if request.sharing == Sharing::Shared
            && request.prot.contains(Protection::WRITE)
            && !file.is_writable()
        {
            return Err(MapError::ReadOnlyFile);
        }
        if request.offset % PAGE_SIZE as u64 != 0 {
            return Err(MapError::UnalignedOffset);
        }
        if request.length == 0 {
            return Err(MapError::EmptyLength);
        }

        let regions = space.regions();
        let slot = regions.free_slot().ok_or(MapError::NoFreeSlot)?;
        let start = page_round_up(regions.highest_end().max(self.config.mmap_base));
        let end = start.checked_add(request.length).ok_or(MapError::NoSpace)?;
        if end > self.config.mmap_limit {
            return Err(MapError::NoSpace);
        }

        let start = VirtualAddress::new(start);
        let region = Region::new(
            start,
            request.length,
            request.prot,
            request.sharing,
            file,
            request.offset,
        );
        log::debug!("mapped {region:?} in slot {slot}");
        space.regions_mut().insert(slot, region);
        Ok(start)
    }

    /// Unmaps `[addr, addr + length)`, which must lie within one region and either
    /// start or end with it.
    ///
    /// For shared regions, dirty pages in the range are written back first. A range
    /// strictly inside a region would split it, which is not supported: that is a
    /// kernel bug and panics.
    pub fn unmap_region<P: PageMapper>(
        &self,
        space: &mut AddressSpace<P>,
        addr: VirtualAddress,
        length: usize,
    ) -> Result<(), UnmapError> {
        if !addr.is_page_aligned() {
            return Err(UnmapError::Unaligned);
        }
        let start = addr.as_usize();
        let end = start.checked_add(length).ok_or(UnmapError::NotMapped)?;
        let (table, regions) = space.split_mut();
        let slot = regions
            .find_covering(start, end)
            .ok_or(UnmapError::NotMapped)?;
        if length == 0 {
            return Ok(());
        }

        let Some(region) = regions.get(slot) else {
            return Err(UnmapError::NotMapped);
        };
        let trim = match (start == region.start().as_usize(), end == region.end()) {
            (true, true) => Trim::Whole,
            (true, false) => Trim::Front,
            (false, true) => Trim::Back,
            (false, false) => halt(format_args!(
                "unmap of [{start:#x}, {end:#x}) would split region {region:?}"
            )),
        };
        if trim == Trim::Front && end % PAGE_SIZE != 0 {
            return Err(UnmapError::Unaligned);
        }

        if region.sharing() == Sharing::Shared {
            self.write_back(&*table, region, start, end)?;
        }
        let released = self.unmap_pages(table, start, page_round_up(end));

        match trim {
            Trim::Whole => drop(regions.remove(slot)),
            Trim::Front => {
                if let Some(region) = regions.get_mut(slot) {
                    region.trim_front(length);
                }
            }
            Trim::Back => {
                if let Some(region) = regions.get_mut(slot) {
                    region.trim_back(length);
                }
            }
        }
        log::debug!("unmapped [{start:#x}, {end:#x}) ({trim:?}), {released} frames released");
        Ok(())
    }

    /// Unmaps a region removed from its address space, writing back what it can.
    pub(crate) fn tear_down_region<P: PageMapper>(&self, table: &mut P, region: &Region) {
        let start = region.start().as_usize();
        if region.sharing() == Sharing::Shared {
            if let Err(err) = self.write_back(&*table, region, start, region.end()) {
                log::warn!("dropping dirty pages of {region:?}: {err}");
            }
        }
        self.unmap_pages(table, start, page_round_up(region.end()));
    }

    /// Writes every dirty page of `region` in `[start, end)` back to its file.
    ///
    /// Each page is written in pieces of at most the configured write-back chunk, one
    /// file-system transaction per piece.
    fn write_back<P: PageMapper>(
        &self,
        table: &P,
        region: &Region,
        start: usize,
        end: usize,
    ) -> Result<(), UnmapError> {
        let file = region.file();
        for addr in (start..end).step_by(PAGE_SIZE) {
            let page = VirtualAddress::new(addr);
            let Some((frame, flags)) = table.translate(page) else {
                continue;
            };
            if !flags.is_dirty() {
                continue;
            }

            let bytes = PAGE_SIZE.min(end - addr);
            // SAFETY: the page is mapped only in this address space, whose owner is
            // blocked in the kernel while it is unmapped.
            let contents = unsafe { &self.frames.memory().frame(frame)[..bytes] };
            let mut offset = region.file_offset(page);
            for chunk in contents.chunks(self.config.writeback_chunk) {
                let _transaction = Transaction::begin(&**file);
                let written = file.write_at(chunk, offset)?;
                if written != chunk.len() {
                    return Err(UnmapError::ShortWrite);
                }
                offset += chunk.len() as u64;
            }
            log::trace!("wrote back {bytes} bytes of {page}");
        }
        Ok(())
    }
}
