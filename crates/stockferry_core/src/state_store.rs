//! Durable transfer state.
//!
//! [`StateStore`] is the single authoritative copy of every transfer, its
//! item snapshot and its chunk progress. All rows live in one [`FrameLog`];
//! the in-memory tables are rebuilt by replaying it on open.
//!
//! Every mutation appends its frame first and only touches the tables once
//! the append succeeded, so a failed write leaves the store exactly as it
//! was.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::{Frame, FrameLog};
use crate::record::Record;
use crate::transfer::{ChunkRecord, ChunkStatus, TransferRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use stockferry_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};

/// File name of the transfer log inside a store directory.
pub const TRANSFERS_LOG: &str = "transfers.log";

const KIND_SNAPSHOT: u8 = 1;
const KIND_TRANSFER: u8 = 2;
const KIND_CHUNK: u8 = 3;
const KIND_DELETE: u8 = 4;

#[derive(Serialize, Deserialize)]
struct SnapshotRow {
    transfer_id: String,
    items: Vec<Record>,
}

#[derive(Serialize, Deserialize)]
struct DeleteRow {
    transfer_id: String,
}

#[derive(Default)]
struct Tables {
    transfers: HashMap<String, TransferRecord>,
    snapshots: HashMap<String, Vec<Record>>,
    chunks: HashMap<String, BTreeMap<u32, ChunkRecord>>,
}

impl Tables {
    fn apply(&mut self, frame: &Frame) -> CoreResult<()> {
        match frame.kind {
            KIND_SNAPSHOT => {
                let row: SnapshotRow = frame.decode()?;
                self.snapshots.insert(row.transfer_id, row.items);
            }
            KIND_TRANSFER => {
                let row: TransferRecord = frame.decode()?;
                self.transfers.insert(row.transfer_id.clone(), row);
            }
            KIND_CHUNK => {
                let row: ChunkRecord = frame.decode()?;
                self.chunks
                    .entry(row.transfer_id.clone())
                    .or_default()
                    .insert(row.chunk_index, row);
            }
            KIND_DELETE => {
                let row: DeleteRow = frame.decode()?;
                self.remove(&row.transfer_id);
            }
            other => {
                return Err(CoreError::serialization(format!(
                    "unknown transfer log frame kind {other}"
                )))
            }
        }
        Ok(())
    }

    fn remove(&mut self, transfer_id: &str) -> bool {
        let existed = self.transfers.remove(transfer_id).is_some();
        self.snapshots.remove(transfer_id);
        self.chunks.remove(transfer_id);
        existed
    }

    /// Frames that recreate the live rows. Snapshots and chunks without a
    /// transfer row are left behind.
    fn live_frames(&self) -> CoreResult<Vec<Frame>> {
        let mut ids: Vec<&String> = self.transfers.keys().collect();
        ids.sort();

        let mut frames = Vec::new();
        for id in ids {
            if let Some(items) = self.snapshots.get(id) {
                frames.push(Frame::encode(
                    KIND_SNAPSHOT,
                    &SnapshotRow {
                        transfer_id: id.clone(),
                        items: items.clone(),
                    },
                )?);
            }
            if let Some(chunks) = self.chunks.get(id) {
                for chunk in chunks.values() {
                    frames.push(Frame::encode(KIND_CHUNK, chunk)?);
                }
            }
            if let Some(transfer) = self.transfers.get(id) {
                frames.push(Frame::encode(KIND_TRANSFER, transfer)?);
            }
        }
        Ok(frames)
    }
}

struct Inner {
    log: FrameLog,
    tables: Tables,
}

impl Inner {
    fn write(&mut self, frame: Frame) -> CoreResult<()> {
        self.log.append(&frame)?;
        self.tables.apply(&frame)?;
        if self.log.wants_compaction() {
            if let Err(e) = self.compact() {
                warn!(error = %e, "automatic compaction of transfer log failed");
                self.log.postpone_compaction();
            }
        }
        Ok(())
    }

    fn compact(&mut self) -> CoreResult<CompactionStats> {
        let bytes_before = self.log.size()?;
        let frames = self.tables.live_frames()?;
        self.log.rewrite(&frames)?;
        let bytes_after = self.log.size()?;
        info!(bytes_before, bytes_after, "transfer log compacted");
        Ok(CompactionStats {
            bytes_before,
            bytes_after,
        })
    }
}

/// Sizes before and after a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Log size before.
    pub bytes_before: u64,
    /// Log size after.
    pub bytes_after: u64,
}

/// The persistent store of transfers and chunks.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StateStore")
            .field("transfers", &inner.tables.transfers.len())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Opens a store over any backend, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or is corrupted.
    pub fn open(backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        let (log, frames) = FrameLog::open(backend, config)?;
        let mut tables = Tables::default();
        for frame in &frames {
            tables.apply(frame)?;
        }
        info!(
            frames = frames.len(),
            transfers = tables.transfers.len(),
            "transfer state loaded"
        );
        Ok(Self {
            inner: Mutex::new(Inner { log, tables }),
        })
    }

    /// Opens `dir/transfers.log`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replayed.
    pub fn open_dir(dir: &Path, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open(&dir.join(TRANSFERS_LOG))?;
        Self::open(Box::new(backend), config)
    }

    /// Creates an empty, non-durable store.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`StateStore::open`].
    pub fn in_memory() -> CoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Registers a new transfer with its snapshot and first chunk.
    ///
    /// The transfer row is written last: if the process dies in between,
    /// the partial rows are invisible and dropped by the next compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any frame cannot be written.
    pub fn create_transfer(
        &self,
        transfer: &TransferRecord,
        items: &[Record],
        first_chunk: &ChunkRecord,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.write(Frame::encode(
            KIND_SNAPSHOT,
            &SnapshotRow {
                transfer_id: transfer.transfer_id.clone(),
                items: items.to_vec(),
            },
        )?)?;
        inner.write(Frame::encode(KIND_CHUNK, first_chunk)?)?;
        inner.write(Frame::encode(KIND_TRANSFER, transfer)?)?;
        debug!(transfer_id = %transfer.transfer_id, items = items.len(), "transfer persisted");
        Ok(())
    }

    /// Writes a transfer row.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn put_transfer(&self, transfer: &TransferRecord) -> CoreResult<()> {
        self.inner
            .lock()
            .write(Frame::encode(KIND_TRANSFER, transfer)?)
    }

    /// Writes a chunk row.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn put_chunk(&self, chunk: &ChunkRecord) -> CoreResult<()> {
        self.inner.lock().write(Frame::encode(KIND_CHUNK, chunk)?)
    }

    /// Deletes a transfer with its snapshot and chunks. Returns whether it
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn delete_transfer(&self, transfer_id: &str) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.tables.transfers.contains_key(transfer_id) {
            return Ok(false);
        }
        inner.write(Frame::encode(
            KIND_DELETE,
            &DeleteRow {
                transfer_id: transfer_id.to_string(),
            },
        )?)?;
        Ok(true)
    }

    /// Looks up a transfer.
    #[must_use]
    pub fn transfer(&self, transfer_id: &str) -> Option<TransferRecord> {
        self.inner.lock().tables.transfers.get(transfer_id).cloned()
    }

    /// The item snapshot taken at submission.
    #[must_use]
    pub fn snapshot(&self, transfer_id: &str) -> Option<Vec<Record>> {
        self.inner.lock().tables.snapshots.get(transfer_id).cloned()
    }

    /// Every chunk of a transfer, by index.
    #[must_use]
    pub fn chunks(&self, transfer_id: &str) -> Vec<ChunkRecord> {
        self.inner
            .lock()
            .tables
            .chunks
            .get(transfer_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One chunk.
    #[must_use]
    pub fn chunk(&self, transfer_id: &str, chunk_index: u32) -> Option<ChunkRecord> {
        self.inner
            .lock()
            .tables
            .chunks
            .get(transfer_id)
            .and_then(|c| c.get(&chunk_index))
            .cloned()
    }

    /// Chunks of a transfer in the given status, by index.
    #[must_use]
    pub fn chunks_with_status(&self, transfer_id: &str, status: ChunkStatus) -> Vec<ChunkRecord> {
        self.chunks(transfer_id)
            .into_iter()
            .filter(|c| c.status == status)
            .collect()
    }

    /// Every transfer, oldest first.
    #[must_use]
    pub fn transfers(&self) -> Vec<TransferRecord> {
        let mut all: Vec<TransferRecord> =
            self.inner.lock().tables.transfers.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        });
        all
    }

    /// Transfers that are pending, in progress or paused.
    #[must_use]
    pub fn non_terminal(&self) -> Vec<TransferRecord> {
        self.transfers()
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect()
    }

    /// Ids of terminal transfers last updated before `cutoff_ms`.
    #[must_use]
    pub fn terminal_before(&self, cutoff_ms: u64) -> Vec<String> {
        self.transfers()
            .into_iter()
            .filter(|t| t.status.is_terminal() && t.last_update < cutoff_ms)
            .map(|t| t.transfer_id)
            .collect()
    }

    /// Number of transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().tables.transfers.len()
    }

    /// True if the store holds no transfers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the log with only the live rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written; the old log is
    /// left in place.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        self.inner.lock().compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Category, Component, OperationKind};
    use crate::transfer::TransferStatus;

    fn items(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::Component(Component {
                    id: format!("c-{i}"),
                    name: format!("part {i}"),
                    ..Component::default()
                })
            })
            .collect()
    }

    fn transfer(id: &str, total: u64) -> TransferRecord {
        TransferRecord {
            transfer_id: id.into(),
            operation_kind: OperationKind::Sync,
            category: Category::Component,
            total_items: total,
            completed_items: 0,
            failed_items: 0,
            chunk_size: 2,
            materialized_items: 2,
            status: TransferStatus::Pending,
            checksum: String::new(),
            created_at: 10,
            last_update: 10,
            error_message: None,
            adopted_evaluation: 0,
        }
    }

    fn seed(store: &StateStore, id: &str) {
        let all = items(5);
        let first = ChunkRecord::new(id, 0, 0, all[..2].to_vec());
        store.create_transfer(&transfer(id, 5), &all, &first).unwrap();
    }

    #[test]
    fn reopen_rebuilds_tables() {
        let backend = InMemoryBackend::new();
        {
            let store = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
            seed(&store, "t1");
            let mut chunk = store.chunk("t1", 0).unwrap();
            chunk.status = ChunkStatus::Completed;
            chunk.attempts = 1;
            store.put_chunk(&chunk).unwrap();
            let mut t = store.transfer("t1").unwrap();
            t.status = TransferStatus::InProgress;
            t.completed_items = 2;
            store.put_transfer(&t).unwrap();
        }

        let store = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        let t = store.transfer("t1").unwrap();
        assert_eq!(t.status, TransferStatus::InProgress);
        assert_eq!(t.completed_items, 2);
        assert_eq!(store.snapshot("t1").unwrap().len(), 5);
        assert_eq!(store.chunk("t1", 0).unwrap().status, ChunkStatus::Completed);
        assert_eq!(store.non_terminal().len(), 1);
    }

    #[test]
    fn delete_removes_everything() {
        let store = StateStore::in_memory().unwrap();
        seed(&store, "t1");
        assert!(store.delete_transfer("t1").unwrap());
        assert!(!store.delete_transfer("t1").unwrap());
        assert!(store.transfer("t1").is_none());
        assert!(store.snapshot("t1").is_none());
        assert!(store.chunks("t1").is_empty());
    }

    #[test]
    fn failed_write_leaves_tables_untouched() {
        let backend = InMemoryBackend::new();
        let store = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        seed(&store, "t1");

        backend.set_fail_writes(true);
        let mut t = store.transfer("t1").unwrap();
        t.status = TransferStatus::InProgress;
        assert!(store.put_transfer(&t).is_err());
        assert_eq!(store.transfer("t1").unwrap().status, TransferStatus::Pending);
    }

    #[test]
    fn retry_after_torn_write_keeps_log_readable() {
        let backend = InMemoryBackend::new();
        let store = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        seed(&store, "t1");

        let mut t = store.transfer("t1").unwrap();
        t.status = TransferStatus::InProgress;
        backend.set_tear_writes(true);
        assert!(store.put_transfer(&t).is_err());
        backend.set_tear_writes(false);
        store.put_transfer(&t).unwrap();
        seed(&store, "t2");

        let reopened = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        assert_eq!(reopened.transfer("t1").unwrap().status, TransferStatus::InProgress);
        assert!(reopened.transfer("t2").is_some());
    }

    #[test]
    fn stray_file_tail_does_not_poison_later_frames() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRANSFERS_LOG);
        let store = StateStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
        seed(&store, "t1");

        let mut frame = Frame::encode(1, &"partial".to_string()).unwrap().to_bytes().unwrap();
        frame.truncate(20);
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&frame)
            .unwrap();

        let mut t = store.transfer("t1").unwrap();
        t.status = TransferStatus::InProgress;
        store.put_transfer(&t).unwrap();
        drop(store);

        let reopened = StateStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(reopened.transfer("t1").unwrap().status, TransferStatus::InProgress);
    }

    #[test]
    fn terminal_before_skips_active() {
        let store = StateStore::in_memory().unwrap();
        seed(&store, "old-done");
        seed(&store, "old-active");
        let mut done = store.transfer("old-done").unwrap();
        done.status = TransferStatus::Completed;
        store.put_transfer(&done).unwrap();

        assert_eq!(store.terminal_before(11), vec!["old-done".to_string()]);
        assert!(store.terminal_before(10).is_empty());
    }

    #[test]
    fn compaction_keeps_live_rows() {
        let backend = InMemoryBackend::new();
        let store = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        seed(&store, "keep");
        seed(&store, "drop");
        for _ in 0..10 {
            let t = store.transfer("keep").unwrap();
            store.put_transfer(&t).unwrap();
        }
        store.delete_transfer("drop").unwrap();

        let stats = store.compact().unwrap();
        assert!(stats.bytes_after < stats.bytes_before);

        let reopened = StateStore::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.transfer("keep"), store.transfer("keep"));
        assert_eq!(reopened.chunks("keep").len(), 1);
        assert_eq!(reopened.snapshot("keep").unwrap().len(), 5);
    }

    #[test]
    fn log_compacts_itself_past_the_threshold() {
        let backend = InMemoryBackend::new();
        let config = StoreConfig::default().compact_threshold(Some(16 * 1024));
        let store = StateStore::open(Box::new(backend.reopen()), config.clone()).unwrap();
        seed(&store, "t1");
        let mut t = store.transfer("t1").unwrap();
        for i in 0..500 {
            t.last_update = 100 + i;
            store.put_transfer(&t).unwrap();
        }
        assert!((backend.data().len() as u64) < 16 * 1024);

        let reopened = StateStore::open(Box::new(backend.reopen()), config).unwrap();
        assert_eq!(reopened.transfer("t1").unwrap().last_update, 599);
        assert_eq!(reopened.snapshot("t1").unwrap().len(), 5);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
            seed(&store, "t1");
        }
        let store = StateStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
        assert!(store.transfer("t1").is_some());
        assert!(dir.path().join(TRANSFERS_LOG).exists());
    }
}
