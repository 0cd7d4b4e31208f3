//! Transport abstraction for chunk delivery.

use crate::error::SyncResult;
use serde::Serialize;
use std::time::Duration;
use stockferry_core::{Category, OperationKind, Record};

/// One chunk on its way to the remote store.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRequest<'a> {
    /// Owning transfer.
    pub transfer_id: &'a str,
    /// Position of the chunk in the transfer.
    pub chunk_index: u32,
    /// What to do with the items.
    pub operation: OperationKind,
    /// Category of every item.
    pub category: Category,
    /// The items.
    pub items: &'a [Record],
    /// `{transfer_id}:{chunk_index}`; stable across resends.
    pub idempotency_key: String,
}

impl ChunkRequest<'_> {
    /// Approximate wire size of the items, used when a transport does not
    /// report one.
    pub fn payload_bytes(&self) -> u64 {
        serde_json::to_vec(self.items).map_or(0, |b| b.len() as u64)
    }
}

/// Acknowledgement of a delivered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    /// Bytes put on the wire.
    pub bytes: u64,
    /// Time the transport measured, if it measures at all.
    pub elapsed: Option<Duration>,
}

/// Delivers chunks to the remote store.
///
/// The remote side must upsert by record identity: a chunk can be sent more
/// than once (retries, resume after a crash mid-chunk) and the
/// `idempotency_key` stays the same each time.
pub trait Transport: Send + Sync {
    /// Sends one chunk.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`](crate::SyncError); `is_retryable` decides
    /// whether the engine tries again.
    fn send(&self, request: &ChunkRequest<'_>) -> SyncResult<ChunkAck>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, request: &ChunkRequest<'_>) -> SyncResult<ChunkAck> {
        (**self).send(request)
    }
}
