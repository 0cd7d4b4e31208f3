//! In-memory storage for tests and ephemeral stores.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    data: RwLock<Vec<u8>>,
    fail_writes: AtomicBool,
    tear_writes: AtomicBool,
}

/// An in-memory backend.
///
/// Clones made with [`InMemoryBackend::reopen`] share the same buffer, which
/// lets tests drop a store and open a fresh one over the "same file".
/// [`InMemoryBackend::set_fail_writes`] makes every mutating call fail until
/// it is switched off again. [`InMemoryBackend::set_tear_writes`] makes
/// appends store only the first half of their bytes before failing.
///
/// ```rust
/// use stockferry_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.append(b"frame").unwrap();
/// let again = backend.reopen();
/// assert_eq!(again.read_all().unwrap(), b"frame");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        let backend = Self::new();
        *backend.shared.data.write() = data;
        backend
    }

    /// Returns a second handle over the same buffer.
    #[must_use]
    pub fn reopen(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.shared.data.read().clone()
    }

    /// Overwrites the contents directly, bypassing fault injection.
    pub fn corrupt_with(&self, data: Vec<u8>) {
        *self.shared.data.write() = data;
    }

    /// Toggles write failures for every handle sharing this buffer.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Toggles torn appends: half the data lands, then the call fails.
    pub fn set_tear_writes(&self, tear: bool) {
        self.shared.tear_writes.store(tear, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("write failure injected".into()));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut data = self.shared.data.write();
        let offset = data.len() as u64;
        if self.shared.tear_writes.load(Ordering::SeqCst) {
            data.extend_from_slice(&new_data[..new_data.len() / 2]);
            return Err(StorageError::Unavailable("torn write injected".into()));
        }
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_writable()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.shared.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;
        let mut data = self.shared.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, new_data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        *self.shared.data.write() = new_data.to_vec();
        Ok(())
    }
}
