//! The file interface mapped regions are backed by.
//!
//! The file-system layer lives outside this crate. A region keeps its file open by
//! holding a [`FileRef`]: duplicating the handle is an `Arc` clone, closing it is a drop.

use alloc::sync::Arc;

/// A shared handle to an open file.
pub type FileRef = Arc<dyn MappedFile>;

/// Errors reported by the file-system layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    /// The underlying device failed.
    #[error("i/o error")]
    Io,
    /// The file was not opened for writing.
    #[error("file is read-only")]
    ReadOnly,
    /// The write would exceed the file-system's size limits.
    #[error("file too large")]
    TooLarge,
}

/// Block-level access to an open file.
///
/// Implementations serialize concurrent access to the same file region internally.
pub trait MappedFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number read.
    ///
    /// Reading at or past the end of the file returns zero.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError>;

    /// Writes `buf` at `offset`, returning the number of bytes written.
    ///
    /// Only called between [`begin_transaction`](Self::begin_transaction) and
    /// [`end_transaction`](Self::end_transaction).
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, FileError>;

    /// Returns whether the file was opened for writing.
    fn is_writable(&self) -> bool;

    /// Returns the current length of the file in bytes.
    fn len(&self) -> u64;

    /// Returns true if the file holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a file-system transaction.
    fn begin_transaction(&self) {}

    /// Commits the transaction opened by [`begin_transaction`](Self::begin_transaction).
    fn end_transaction(&self) {}
}

/// Keeps a file-system transaction open until dropped.
pub(crate) struct Transaction<'a> {
    file: &'a dyn MappedFile,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(file: &'a dyn MappedFile) -> Self {
        file.begin_transaction();
        Self { file }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.file.end_transaction();
    }
}
