//! Storage backend trait definition.

use crate::error::StorageResult;

/// A durable byte store holding one append-only log.
///
/// Backends do not interpret the bytes. Framing, checksums and replay are
/// owned by the log layer in `stockferry_core`.
///
/// # Invariants
///
/// - `append` returns the offset where the data starts
/// - `read_all` returns every byte appended since the last `replace`
/// - after `sync` returns, appended data survives process termination
/// - `replace` swaps the full contents in one step; a crash leaves either
///   the old or the new contents, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads the full contents.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`. Used to cut a torn tail frame.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is beyond the end or the I/O fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Replaces the full contents with `data`. Used by log compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
