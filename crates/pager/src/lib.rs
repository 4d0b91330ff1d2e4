#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Pager
//!
//! The physical-memory and demand-paging core of a small multi-core kernel. It provides:
//!
//! - Reference-counted frame allocation, from one shared free list or from per-CPU
//!   lists that steal from each other.
//! - File-backed mapping regions, committed page by page on first touch.
//! - Lazy heap growth with zero-filled pages.
//! - Copy-on-write sharing of heap pages between a parent and a child address space.
//! - Software emulation of physical memory and page tables for testing in non-kernel
//!   environments.

extern crate alloc;

mod address;
mod address_space;
mod allocator;
mod config;
mod fault;
mod file;
mod frame;
mod frame_table;
mod halt;
mod memory;
mod mmap;
mod numbers;
mod page_table;
mod pager;
mod physical_memory_manager;
mod region;

#[cfg(test)]
mod testing;

pub use address::{
    MAX_PHYSICAL_BITS, MAX_VIRTUAL, MAX_VIRTUAL_BITS, PhysicalAddress, VirtualAddress,
    page_round_down, page_round_up,
};
pub use address_space::AddressSpace;
pub use allocator::{AllocError, AllocatorPolicy, FreeFrames, PerCpuFreeLists, SingleFreeList};
pub use config::{
    DEFAULT_MAX_REGIONS, DEFAULT_MMAP_BASE, DEFAULT_MMAP_LIMIT, DEFAULT_WRITEBACK_CHUNK,
    PagerConfig,
};
pub use fault::{FaultCause, FaultError, Resolution};
pub use file::{FileError, FileRef, MappedFile};
pub use frame::{Frame, FrameFlag, FrameFlags};
pub use frame_table::FrameTable;
#[cfg(any(test, feature = "software-emulation"))]
pub use memory::EmulatedMemory;
pub use memory::PhysicalMemory;
pub use mmap::{
    MAP_PRIVATE, MAP_SHARED, MapError, MapRequest, PROT_EXEC, PROT_READ, PROT_WRITE,
    UnmapError,
};
pub use numbers::{FrameNumber, PageNumber};
#[cfg(any(test, feature = "software-emulation"))]
pub use page_table::{PageDirectory, PageTable};
pub use page_table::{PageEntry, PageFlags, PageMapper, PageTableError};
pub use pager::{ForkError, GrowError, Pager};
pub use physical_memory_manager::{JUNK_ON_ALLOC, JUNK_ON_FREE, PhysicalMemoryManager};
pub use region::{Protection, Region, RegionTable, Sharing};

/// Size of a page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 4096;
