//! # stockferry_storage
//!
//! Byte-level backends for the stockferry state logs.
//!
//! A backend is an opaque, append-only byte store. It knows nothing about
//! frames, transfers or checksums; those live in `stockferry_core`.
//!
//! - [`FileBackend`]: a file on disk, compacted with write-then-rename
//! - [`InMemoryBackend`]: a shared buffer with write-fault injection, for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
