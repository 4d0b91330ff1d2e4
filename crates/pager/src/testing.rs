//! Fixtures shared by the unit tests.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{
    AllocatorPolicy, FileError, MappedFile, PAGE_SIZE, PageDirectory, PageFlags, PageMapper,
    PageTableError, PhysicalAddress, PhysicalMemory, PhysicalMemoryManager, VirtualAddress,
};

/// Physical address of the first emulated byte; the kernel image is loaded here.
pub const PHYS_BASE: PhysicalAddress = PhysicalAddress::new(0x8000_0000);

/// First address after the kernel image.
pub const KERNEL_END: PhysicalAddress = PhysicalAddress::new(0x8000_0000 + 2 * PAGE_SIZE);

/// Builds a single-list manager with `frames` free frames above a two-frame kernel.
pub fn manager(frames: usize) -> PhysicalMemoryManager {
    manager_with(frames, AllocatorPolicy::SingleList)
}

/// Builds a manager with `frames` free frames and the given policy.
pub fn manager_with(frames: usize, policy: AllocatorPolicy) -> PhysicalMemoryManager {
    let size = KERNEL_END.as_usize() - PHYS_BASE.as_usize() + frames * PAGE_SIZE;
    let memory = PhysicalMemory::emulated(PHYS_BASE, size);
    PhysicalMemoryManager::new(memory, KERNEL_END, PHYS_BASE + size, policy)
}

fn pattern(pages: usize) -> Vec<u8> {
    (0..pages * PAGE_SIZE)
        .map(|i| (i / PAGE_SIZE + 1) as u8)
        .collect()
}

/// How a [`MemoryFile`] answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writes {
    /// Every byte is stored.
    Accept,
    /// Every write fails with an i/o error.
    Fail,
    /// Only the first half of every write is stored.
    Short,
}

/// An in-memory file.
pub struct MemoryFile {
    contents: Mutex<Vec<u8>>,
    writable: bool,
    transactions: Mutex<usize>,
    open_transaction: Mutex<bool>,
    fail_reads: bool,
    writes: Writes,
}

impl MemoryFile {
    /// Creates a file holding `contents`.
    pub fn new(contents: &[u8], writable: bool) -> Arc<Self> {
        Arc::new(Self {
            contents: Mutex::new(contents.to_vec()),
            writable,
            transactions: Mutex::new(0),
            open_transaction: Mutex::new(false),
            fail_reads: false,
            writes: Writes::Accept,
        })
    }

    /// Creates a file whose reads always fail.
    pub fn unreadable(len: usize) -> Arc<Self> {
        Arc::new(Self {
            contents: Mutex::new(alloc::vec![0; len]),
            writable: false,
            transactions: Mutex::new(0),
            open_transaction: Mutex::new(false),
            fail_reads: true,
            writes: Writes::Accept,
        })
    }

    /// Creates a file of `pages` pages where every byte of page `n` is `n + 1`.
    pub fn patterned(pages: usize, writable: bool) -> Arc<Self> {
        Self::new(&pattern(pages), writable)
    }

    /// Like [`patterned`](Self::patterned), for a writable file answering writes as
    /// `writes` says.
    pub fn patterned_with(pages: usize, writes: Writes) -> Arc<Self> {
        Arc::new(Self {
            contents: Mutex::new(pattern(pages)),
            writable: true,
            transactions: Mutex::new(0),
            open_transaction: Mutex::new(false),
            fail_reads: false,
            writes,
        })
    }

    /// Returns a copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().clone()
    }

    /// Returns how many transactions have been completed.
    pub fn transactions(&self) -> usize {
        *self.transactions.lock()
    }
}

impl MappedFile for MemoryFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError> {
        if self.fail_reads {
            return Err(FileError::Io);
        }
        let contents = self.contents.lock();
        let start = (offset as usize).min(contents.len());
        let end = (start + buf.len()).min(contents.len());
        buf[..end - start].copy_from_slice(&contents[start..end]);
        Ok(end - start)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, FileError> {
        assert!(*self.open_transaction.lock(), "write outside a transaction");
        if !self.writable {
            return Err(FileError::ReadOnly);
        }
        let buf = match self.writes {
            Writes::Accept => buf,
            Writes::Fail => return Err(FileError::Io),
            Writes::Short => &buf[..buf.len() / 2],
        };
        let mut contents = self.contents.lock();
        let start = offset as usize;
        if contents.len() < start + buf.len() {
            contents.resize(start + buf.len(), 0);
        }
        contents[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn len(&self) -> u64 {
        self.contents.lock().len() as u64
    }

    fn begin_transaction(&self) {
        let mut open = self.open_transaction.lock();
        assert!(!*open, "nested transaction");
        *open = true;
    }

    fn end_transaction(&self) {
        let mut open = self.open_transaction.lock();
        assert!(*open, "transaction ended twice");
        *open = false;
        *self.transactions.lock() += 1;
    }
}

/// A software page table that can be told to refuse new mappings.
#[derive(Default)]
pub struct RefusingDirectory {
    inner: PageDirectory,
    /// How many upcoming [`map`](PageMapper::map) calls fail as if out of table memory.
    pub refusals: usize,
}

impl PageMapper for RefusingDirectory {
    fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), PageTableError> {
        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(PageTableError::OutOfMemory);
        }
        self.inner.map(virt, phys, flags)
    }

    fn unmap(&mut self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.inner.unmap(virt)
    }

    fn translate(&self, virt: VirtualAddress) -> Option<(PhysicalAddress, PageFlags)> {
        self.inner.translate(virt)
    }

    fn update_flags(&mut self, virt: VirtualAddress, flags: PageFlags) -> Result<(), PageTableError> {
        self.inner.update_flags(virt, flags)
    }
}
