//! Transfer coordination.
//!
//! A [`TransferCoordinator`] registers transfers in the [`StateStore`] and
//! runs one worker thread per active transfer. Workers send chunks in index
//! order, feed every outcome to the [`NetworkMonitor`] and let the
//! [`ChunkPlanner`] size the next chunk.
//!
//! Chunks are materialized lazily: a transfer starts with its first chunk,
//! and each later chunk is cut from the stored item snapshot with the size
//! current at that moment. A resized transfer therefore never rewrites a
//! chunk that already exists, and the chunks always tile the snapshot.
//!
//! Every state change goes to the store before the in-memory slot; the
//! store is the only durable copy and the slots can be rebuilt from it at
//! any time with [`TransferCoordinator::recover`].

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::monitor::{ChunkOutcome, Lane, NetworkMonitor};
use crate::planner::ChunkPlanner;
use crate::transport::{ChunkRequest, Transport};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use stockferry_core::{
    duration_ms, items_checksum, transfer_id, Category, ChunkRecord, ChunkStatus, Clock,
    CoreResult, OperationKind, Record, StateStore, TransferRecord, TransferStatus,
};
use tracing::{debug, error, info, warn};

/// A transfer that has not completed, with how far it got.
#[derive(Debug, Clone, PartialEq)]
pub struct IncompleteTransfer {
    /// The transfer.
    pub transfer: TransferRecord,
    /// Fraction of items delivered.
    pub completion_rate: f64,
}

struct SlotState {
    record: TransferRecord,
    worker_active: bool,
}

struct TransferSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl TransferSlot {
    fn new(record: TransferRecord, worker_active: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                record,
                worker_active,
            }),
            changed: Condvar::new(),
        })
    }

    fn snapshot(&self) -> TransferRecord {
        self.state.lock().record.clone()
    }

    /// Marks a runnable transfer with no worker as taken; true if it was.
    fn claim_if_stalled(&self) -> bool {
        let mut state = self.state.lock();
        let runnable = matches!(
            state.record.status,
            TransferStatus::Pending | TransferStatus::InProgress
        );
        if !runnable || state.worker_active {
            return false;
        }
        state.worker_active = true;
        true
    }
}

struct Shared {
    config: SyncConfig,
    store: Arc<StateStore>,
    transport: Arc<dyn Transport>,
    planner: ChunkPlanner,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Arc<TransferSlot>>>,
    seq: AtomicU64,
}

/// Runs transfers to completion over a [`Transport`].
pub struct TransferCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("config", &self.shared.config)
            .field("transfers", &self.shared.slots.lock().len())
            .finish_non_exhaustive()
    }
}

impl TransferCoordinator {
    /// Creates a coordinator.
    ///
    /// The monitor is shared so several coordinators (or a dashboard) can
    /// read the same network picture.
    pub fn new(
        config: SyncConfig,
        store: Arc<StateStore>,
        transport: Arc<dyn Transport>,
        monitor: Arc<NetworkMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let planner = ChunkPlanner::new(config.planner.clone(), config.bounds(), monitor);
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                transport,
                planner,
                clock,
                slots: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// The monitor fed by this coordinator's workers.
    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        self.shared.planner.monitor()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.shared.store
    }

    /// Registers a transfer and starts sending it in the background.
    ///
    /// # Errors
    ///
    /// `EmptyInput` for an empty item list, `InvalidCategory` when an item
    /// belongs to another category, `TooManyActive` when the configured cap
    /// is reached, or a storage error if the transfer could not be persisted.
    pub fn submit(
        &self,
        operation: OperationKind,
        category: Category,
        items: Vec<Record>,
    ) -> SyncResult<String> {
        if items.is_empty() {
            return Err(SyncError::EmptyInput);
        }
        if let Some(stray) = items.iter().find(|item| item.category() != category) {
            return Err(SyncError::InvalidCategory(format!(
                "item {} is a {}, transfer is for {category}",
                stray.id(),
                stray.category()
            )));
        }
        if let Some(limit) = self.shared.config.max_active_transfers {
            if self.active_count() >= limit {
                return Err(SyncError::TooManyActive { limit });
            }
        }

        let shared = &self.shared;
        let seq = shared.seq.fetch_add(1, Ordering::SeqCst);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = transfer_id(operation, category, items.len(), nanos, seq);
        let lane = Lane::for_transfer(operation, category);
        let plan = shared.planner.initial_size(lane);
        let now = shared.clock.now_ms();

        let first_len = (plan.size as usize).min(items.len());
        let first = ChunkRecord::new(id.as_str(), 0, 0, items[..first_len].to_vec());
        let record = TransferRecord {
            transfer_id: id.clone(),
            operation_kind: operation,
            category,
            total_items: items.len() as u64,
            completed_items: 0,
            failed_items: 0,
            chunk_size: plan.size,
            materialized_items: first_len as u64,
            status: TransferStatus::Pending,
            checksum: items_checksum(&items)?,
            created_at: now,
            last_update: now,
            error_message: None,
            adopted_evaluation: plan.evaluation,
        };
        shared.store.create_transfer(&record, &items, &first)?;

        let slot = TransferSlot::new(record, true);
        shared.slots.lock().insert(id.clone(), Arc::clone(&slot));
        info!(
            transfer_id = %id,
            %operation,
            %category,
            items = items.len(),
            chunk_size = plan.size,
            "transfer submitted"
        );
        spawn_worker(shared, &id, slot)?;
        Ok(id)
    }

    /// Like [`submit`](Self::submit), with the category given by name.
    ///
    /// # Errors
    ///
    /// `InvalidCategory` for an unknown name, otherwise as `submit`.
    pub fn submit_named(
        &self,
        operation: OperationKind,
        category: &str,
        items: Vec<Record>,
    ) -> SyncResult<String> {
        let category: Category = category.parse().map_err(SyncError::from_input)?;
        self.submit(operation, category, items)
    }

    /// Asks a running transfer to stop after its in-flight chunk.
    ///
    /// Returns `false` unless the transfer is in progress.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the new status cannot be persisted.
    pub fn pause(&self, transfer_id: &str) -> SyncResult<bool> {
        let Some(slot) = self.slot(transfer_id) else {
            return Ok(false);
        };
        let mut state = slot.state.lock();
        let mut next = state.record.clone();
        if !next.transition_to(TransferStatus::Paused) {
            return Ok(false);
        }
        next.last_update = self.shared.clock.now_ms();
        self.shared.store.put_transfer(&next)?;
        state.record = next;
        slot.changed.notify_all();
        info!(transfer_id, "transfer paused");
        Ok(true)
    }

    /// Continues a paused transfer from its lowest chunk that is not
    /// completed. Chunks that failed before the pause are sent again and
    /// their items leave `failed_items`.
    ///
    /// Returns `false` unless the transfer is paused. If the previous worker
    /// is still finishing its last chunk it simply carries on; no second
    /// worker is started.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the new state cannot be persisted, or a
    /// worker error if no thread could be started.
    pub fn resume(&self, transfer_id: &str) -> SyncResult<bool> {
        let Some(slot) = self.slot(transfer_id) else {
            return Ok(false);
        };
        let spawn = {
            let mut state = slot.state.lock();
            let mut next = state.record.clone();
            if next.status != TransferStatus::Paused
                || !next.transition_to(TransferStatus::InProgress)
            {
                return Ok(false);
            }
            let requeued = self.requeue_failed(transfer_id)?;
            next.failed_items = next.failed_items.saturating_sub(requeued);
            next.last_update = self.shared.clock.now_ms();
            self.shared.store.put_transfer(&next)?;
            state.record = next;
            let spawn = !state.worker_active;
            state.worker_active = true;
            slot.changed.notify_all();
            spawn
        };
        info!(transfer_id, restart_worker = spawn, "transfer resumed");
        if spawn {
            spawn_worker(&self.shared, transfer_id, slot)?;
        }
        Ok(true)
    }

    /// Current state of a transfer, from memory or else the store.
    pub fn status(&self, transfer_id: &str) -> Option<TransferRecord> {
        match self.slot(transfer_id) {
            Some(slot) => Some(slot.snapshot()),
            None => self.shared.store.transfer(transfer_id),
        }
    }

    /// Every pending, in-progress or paused transfer, oldest first.
    pub fn list_active(&self) -> Vec<TransferRecord> {
        self.overlay(self.shared.store.non_terminal())
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect()
    }

    /// Transfers that have not completed, with their completion rate.
    pub fn incomplete_transfers(&self) -> Vec<IncompleteTransfer> {
        self.overlay(self.shared.store.transfers())
            .into_iter()
            .filter(|t| t.status != TransferStatus::Completed)
            .map(|t| IncompleteTransfer {
                completion_rate: t.completion_rate(),
                transfer: t,
            })
            .collect()
    }

    /// Persisted chunk rows of a transfer, by index.
    pub fn chunks(&self, transfer_id: &str) -> Vec<ChunkRecord> {
        self.shared.store.chunks(transfer_id)
    }

    /// Deletes finished transfers last updated more than `older_than` ago.
    /// Unfinished transfers are never touched. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a deletion cannot be persisted.
    pub fn cleanup(&self, older_than: Duration) -> SyncResult<usize> {
        let cutoff = self
            .shared
            .clock
            .now_ms()
            .saturating_sub(duration_ms(older_than));
        let mut removed = 0;
        for id in self.shared.store.terminal_before(cutoff) {
            if self.shared.store.delete_transfer(&id)? {
                removed += 1;
            }
            self.shared.slots.lock().remove(&id);
        }
        info!(removed, "finished transfers cleaned up");
        Ok(removed)
    }

    /// Reloads every unfinished transfer from the store and restarts the
    /// workers of those that were pending or in progress. This includes
    /// transfers already loaded whose worker stopped after the store kept
    /// failing. Paused transfers stay paused. Returns the ids that were
    /// (re)started.
    ///
    /// # Errors
    ///
    /// Returns a worker error if a thread could not be started.
    pub fn recover(&self) -> SyncResult<Vec<String>> {
        let mut started = Vec::new();
        for record in self.shared.store.non_terminal() {
            let id = record.transfer_id.clone();
            let runnable = matches!(
                record.status,
                TransferStatus::Pending | TransferStatus::InProgress
            );
            let (slot, spawn) = {
                let mut slots = self.shared.slots.lock();
                match slots.get(&id).cloned() {
                    Some(existing) => {
                        let spawn = existing.claim_if_stalled();
                        (existing, spawn)
                    }
                    None => {
                        let slot = TransferSlot::new(record, runnable);
                        slots.insert(id.clone(), Arc::clone(&slot));
                        (slot, runnable)
                    }
                }
            };
            if spawn {
                spawn_worker(&self.shared, &id, slot)?;
                started.push(id);
            }
        }
        info!(restarted = started.len(), "transfers recovered");
        Ok(started)
    }

    /// Blocks until the transfer is finished or its worker has stopped
    /// (paused, or gave up on the store), or `timeout` elapses. Returns the
    /// state at that point, or `None` for an unknown id.
    pub fn wait(&self, transfer_id: &str, timeout: Duration) -> Option<TransferRecord> {
        let Some(slot) = self.slot(transfer_id) else {
            return self.shared.store.transfer(transfer_id);
        };
        let deadline = Instant::now() + timeout;
        let mut state = slot.state.lock();
        while !state.record.status.is_terminal() && state.worker_active {
            if slot.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Some(state.record.clone())
    }

    /// Starts a new transfer carrying only the items of the failed chunks of
    /// a failed transfer. The failed transfer is left as it is.
    ///
    /// # Errors
    ///
    /// `TransferNotFound` for an unknown id, `InvalidState` unless the
    /// transfer failed, otherwise as [`submit`](Self::submit).
    pub fn retry_failed_only(&self, transfer_id: &str) -> SyncResult<String> {
        let record = self
            .status(transfer_id)
            .ok_or_else(|| SyncError::TransferNotFound(transfer_id.to_string()))?;
        if record.status != TransferStatus::Failed {
            return Err(SyncError::InvalidState {
                transfer_id: transfer_id.to_string(),
                status: record.status.to_string(),
                expected: TransferStatus::Failed.to_string(),
            });
        }
        let items: Vec<Record> = self
            .shared
            .store
            .chunks_with_status(transfer_id, ChunkStatus::Failed)
            .into_iter()
            .flat_map(|c| c.payload)
            .collect();
        info!(
            transfer_id,
            items = items.len(),
            "resubmitting failed chunks"
        );
        self.submit(record.operation_kind, record.category, items)
    }

    /// Marks every failed chunk pending again; returns their item count.
    fn requeue_failed(&self, transfer_id: &str) -> SyncResult<u64> {
        let mut items = 0;
        for mut chunk in self
            .shared
            .store
            .chunks_with_status(transfer_id, ChunkStatus::Failed)
        {
            chunk.status = ChunkStatus::Pending;
            chunk.error_message = None;
            self.shared.store.put_chunk(&chunk)?;
            items += chunk.len();
        }
        if items > 0 {
            debug!(transfer_id, items, "failed chunks requeued");
        }
        Ok(items)
    }

    fn slot(&self, transfer_id: &str) -> Option<Arc<TransferSlot>> {
        self.shared.slots.lock().get(transfer_id).cloned()
    }

    fn active_count(&self) -> usize {
        self.list_active().len()
    }

    /// Replaces store rows with the cached copy where one exists.
    fn overlay(&self, rows: Vec<TransferRecord>) -> Vec<TransferRecord> {
        rows.into_iter()
            .map(|row| match self.slot(&row.transfer_id) {
                Some(slot) => slot.snapshot(),
                None => row,
            })
            .collect()
    }
}

fn spawn_worker(shared: &Arc<Shared>, transfer_id: &str, slot: Arc<TransferSlot>) -> SyncResult<()> {
    let worker_shared = Arc::clone(shared);
    let worker_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name(format!("stockferry-transfer-{transfer_id}"))
        .spawn(move || Worker::new(worker_shared, worker_slot).run());
    if let Err(e) = spawned {
        let mut state = slot.state.lock();
        state.worker_active = false;
        slot.changed.notify_all();
        return Err(SyncError::Worker(e.to_string()));
    }
    Ok(())
}

/// Marker for "the store kept failing"; the details are already logged.
struct PersistFailed;

struct Worker {
    shared: Arc<Shared>,
    slot: Arc<TransferSlot>,
    snapshot: Option<Arc<Vec<Record>>>,
}

impl Worker {
    fn new(shared: Arc<Shared>, slot: Arc<TransferSlot>) -> Self {
        Self {
            shared,
            slot,
            snapshot: None,
        }
    }

    fn run(mut self) {
        let id = self.slot.snapshot().transfer_id;
        debug!(transfer_id = %id, "worker started");
        if self.drive().is_err() {
            error!(transfer_id = %id, "worker stopped: state could not be persisted");
            self.retire();
        }
    }

    fn retire(&self) {
        let mut state = self.slot.state.lock();
        state.worker_active = false;
        self.slot.changed.notify_all();
    }

    fn drive(&mut self) -> Result<(), PersistFailed> {
        self.update(|r| {
            if r.status == TransferStatus::Pending {
                r.transition_to(TransferStatus::InProgress);
            }
        })?;

        loop {
            let record = {
                let mut state = self.slot.state.lock();
                if state.record.status != TransferStatus::InProgress {
                    // Exit decision and flag reset happen under one lock so a
                    // concurrent resume sees a consistent worker_active.
                    state.worker_active = false;
                    self.slot.changed.notify_all();
                    return Ok(());
                }
                state.record.clone()
            };

            match self.next_chunk(&record)? {
                Some(chunk) => self.process(&record, chunk)?,
                None => {
                    self.finish()?;
                    self.retire();
                    return Ok(());
                }
            }
        }
    }

    fn next_chunk(&mut self, record: &TransferRecord) -> Result<Option<ChunkRecord>, PersistFailed> {
        let chunks = self.shared.store.chunks(&record.transfer_id);
        if let Some(pending) = chunks.iter().find(|c| c.status == ChunkStatus::Pending) {
            return Ok(Some(pending.clone()));
        }

        let next_start = chunks.last().map_or(0, |c| c.start + c.len());
        if next_start >= record.total_items {
            return Ok(None);
        }
        let snapshot = self.snapshot(&record.transfer_id)?;
        let start = next_start as usize;
        let end = (start + record.chunk_size as usize).min(snapshot.len());
        let index = chunks.last().map_or(0, |c| c.chunk_index + 1);
        let chunk = ChunkRecord::new(
            record.transfer_id.as_str(),
            index,
            next_start,
            snapshot[start..end].to_vec(),
        );

        let store = Arc::clone(&self.shared.store);
        self.persist("chunk", &record.transfer_id, || store.put_chunk(&chunk))?;
        let materialized = end as u64;
        self.update(|r| r.materialized_items = materialized)?;
        debug!(
            transfer_id = %record.transfer_id,
            chunk_index = index,
            chunk_size = end - start,
            "chunk materialized"
        );
        Ok(Some(chunk))
    }

    fn snapshot(&mut self, transfer_id: &str) -> Result<Arc<Vec<Record>>, PersistFailed> {
        if let Some(items) = &self.snapshot {
            return Ok(Arc::clone(items));
        }
        match self.shared.store.snapshot(transfer_id) {
            Some(items) => {
                let items = Arc::new(items);
                self.snapshot = Some(Arc::clone(&items));
                Ok(items)
            }
            None => {
                error!(transfer_id, "item snapshot missing from store");
                Err(PersistFailed)
            }
        }
    }

    fn process(&mut self, record: &TransferRecord, mut chunk: ChunkRecord) -> Result<(), PersistFailed> {
        let retry = self.shared.config.retry.clone();
        let request = ChunkRequest {
            transfer_id: &record.transfer_id,
            chunk_index: chunk.chunk_index,
            operation: record.operation_kind,
            category: record.category,
            items: &chunk.payload,
            idempotency_key: chunk.idempotency_key(),
        };
        let payload_bytes = request.payload_bytes();

        let mut outcome = ChunkOutcome {
            success: false,
            duration: Duration::ZERO,
            bytes: payload_bytes,
            retries: 0,
            items: chunk.payload.len() as u32,
            error: None,
        };
        let mut attempts = chunk.attempts;
        let mut last_error = None;
        for attempt in 0..retry.max_attempts {
            thread::sleep(retry.delay_for_attempt(attempt));
            attempts += 1;
            let started = Instant::now();
            let result = self.shared.transport.send(&request);
            match result {
                Ok(ack) => {
                    outcome.success = true;
                    outcome.duration = ack.elapsed.unwrap_or_else(|| started.elapsed());
                    if ack.bytes > 0 {
                        outcome.bytes = ack.bytes;
                    }
                    last_error = None;
                    break;
                }
                Err(e) => {
                    outcome.duration = started.elapsed();
                    let retryable = e.is_retryable();
                    let message = e.to_string();
                    warn!(
                        transfer_id = %record.transfer_id,
                        chunk_index = chunk.chunk_index,
                        attempt = attempt + 1,
                        retryable,
                        error = %message,
                        "chunk send failed"
                    );
                    last_error = Some(message);
                    if !retryable {
                        break;
                    }
                }
            }
        }
        drop(request);

        outcome.retries = attempts.saturating_sub(chunk.attempts).saturating_sub(1);
        outcome.error = last_error.clone();
        chunk.attempts = attempts;
        chunk.last_attempt = Some(self.shared.clock.now_ms());
        chunk.error_message = last_error;
        chunk.status = if outcome.success {
            ChunkStatus::Completed
        } else {
            ChunkStatus::Failed
        };
        let store = Arc::clone(&self.shared.store);
        self.persist("chunk", &record.transfer_id, || store.put_chunk(&chunk))?;

        let lane = Lane::for_transfer(record.operation_kind, record.category);
        self.shared.planner.monitor().record(lane, outcome.clone());
        let len = chunk.len();
        let success = outcome.success;
        self.update(|r| {
            let decision =
                self.shared
                    .planner
                    .next_size(lane, r.chunk_size, &outcome, r.adopted_evaluation);
            if success {
                r.completed_items += len;
            } else {
                r.failed_items += len;
            }
            r.chunk_size = decision.size;
            r.adopted_evaluation = decision.evaluation;
        })?;
        debug!(
            transfer_id = %record.transfer_id,
            chunk_index = chunk.chunk_index,
            attempts = chunk.attempts,
            success,
            "chunk finished"
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PersistFailed> {
        // Chunk rows are authoritative for the final tally.
        let (mut completed, mut failed) = (0, 0);
        for chunk in self.shared.store.chunks(&self.slot.snapshot().transfer_id) {
            match chunk.status {
                ChunkStatus::Completed => completed += chunk.len(),
                ChunkStatus::Failed => failed += chunk.len(),
                ChunkStatus::Pending => {}
            }
        }
        self.update(|r| {
            r.completed_items = completed;
            r.failed_items = failed;
            if !r.is_settled() {
                return;
            }
            if r.failed_items > 0 {
                if r.transition_to(TransferStatus::Failed) {
                    r.error_message = Some(format!(
                        "transfer failed: {}/{} items failed",
                        r.failed_items, r.total_items
                    ));
                }
            } else if r.transition_to(TransferStatus::Completed) {
                r.error_message = None;
            }
        })?;
        let record = self.slot.snapshot();
        if record.status == TransferStatus::Failed {
            warn!(
                transfer_id = %record.transfer_id,
                failed = record.failed_items,
                total = record.total_items,
                "transfer failed"
            );
        } else {
            info!(transfer_id = %record.transfer_id, status = %record.status, "transfer finished");
        }
        Ok(())
    }

    /// Applies `change` to the cached record, persists it, then publishes it.
    ///
    /// The change is re-applied to the latest cached record on every attempt,
    /// so a pause landing between two attempts is never overwritten.
    fn update(&self, change: impl Fn(&mut TransferRecord)) -> Result<(), PersistFailed> {
        let policy = self.shared.config.persist_retry.clone();
        let mut attempt = 0;
        loop {
            thread::sleep(policy.delay_for_attempt(attempt));
            attempt += 1;
            let mut state = self.slot.state.lock();
            let mut next = state.record.clone();
            change(&mut next);
            if next == state.record {
                return Ok(());
            }
            next.last_update = self.shared.clock.now_ms();
            match self.shared.store.put_transfer(&next) {
                Ok(()) => {
                    state.record = next;
                    self.slot.changed.notify_all();
                    return Ok(());
                }
                Err(e) => {
                    drop(state);
                    if give_up(&policy, attempt, &next.transfer_id, "transfer", &e) {
                        return Err(PersistFailed);
                    }
                }
            }
        }
    }

    fn persist(
        &self,
        what: &str,
        transfer_id: &str,
        write: impl Fn() -> CoreResult<()>,
    ) -> Result<(), PersistFailed> {
        let policy = self.shared.config.persist_retry.clone();
        let mut attempt = 0;
        loop {
            thread::sleep(policy.delay_for_attempt(attempt));
            attempt += 1;
            match write() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if give_up(&policy, attempt, transfer_id, what, &e) {
                        return Err(PersistFailed);
                    }
                }
            }
        }
    }
}

fn give_up(
    policy: &RetryConfig,
    attempt: u32,
    transfer_id: &str,
    what: &str,
    err: &stockferry_core::CoreError,
) -> bool {
    if attempt >= policy.max_attempts {
        error!(transfer_id, row = what, attempt, error = %err, "giving up on store write");
        true
    } else {
        warn!(transfer_id, row = what, attempt, error = %err, "store write failed, retrying");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChunkAck;
    use stockferry_core::{ManualClock, Package};

    struct Accepting {
        sent: Mutex<Vec<u32>>,
    }

    impl Transport for Accepting {
        fn send(&self, request: &ChunkRequest<'_>) -> SyncResult<ChunkAck> {
            self.sent.lock().push(request.chunk_index);
            Ok(ChunkAck {
                bytes: 2048,
                elapsed: Some(Duration::from_millis(10)),
            })
        }
    }

    struct Refusing;

    impl Transport for Refusing {
        fn send(&self, _request: &ChunkRequest<'_>) -> SyncResult<ChunkAck> {
            Err(SyncError::transport_fatal("rejected"))
        }
    }

    fn packages(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::Package(Package {
                    id: format!("pkg-{i}"),
                    name: format!("SOT-{i}"),
                    ..Package::default()
                })
            })
            .collect()
    }

    fn coordinator(
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> (TransferCoordinator, Arc<ManualClock>) {
        let manual = Arc::new(ManualClock::new(1_000));
        let clock: Arc<dyn Clock> = manual.clone();
        let monitor = Arc::new(NetworkMonitor::new(
            config.monitor.clone(),
            config.bounds(),
            Arc::clone(&clock),
        ));
        let store = Arc::new(StateStore::in_memory().unwrap());
        (
            TransferCoordinator::new(config, store, transport, monitor, clock),
            manual,
        )
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::new()
            .with_retry(RetryConfig::immediate(3))
            .with_persist_retry(RetryConfig::immediate(2))
            .with_chunk_bounds(4, 4)
    }

    #[test]
    fn submit_runs_to_completion() {
        let transport = Arc::new(Accepting {
            sent: Mutex::new(Vec::new()),
        });
        let (coord, _) = coordinator(transport.clone(), fast_config());

        let id = coord
            .submit(OperationKind::Sync, Category::Package, packages(10))
            .unwrap();
        let done = coord.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.completed_items, 10);
        assert_eq!(done.materialized_items, 10);
        assert_eq!(*transport.sent.lock(), vec![0, 1, 2]);

        let lens: Vec<u64> = coord.chunks(&id).iter().map(ChunkRecord::len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(coord.list_active().is_empty());
        assert!(coord.incomplete_transfers().is_empty());
    }

    #[test]
    fn fatal_error_is_not_retried() {
        let (coord, _) = coordinator(Arc::new(Refusing), fast_config());

        let id = coord
            .submit(OperationKind::Delete, Category::Package, packages(3))
            .unwrap();
        let done = coord.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(done.status, TransferStatus::Failed);
        assert_eq!(
            done.error_message.as_deref(),
            Some("transfer failed: 3/3 items failed")
        );
        let chunks = coord.chunks(&id);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].attempts, 1);
        assert_eq!(chunks[0].status, ChunkStatus::Failed);

        let incomplete = coord.incomplete_transfers();
        assert_eq!(incomplete.len(), 1);
        assert!(incomplete[0].completion_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_input() {
        let (coord, _) = coordinator(Arc::new(Refusing), fast_config());

        assert!(matches!(
            coord.submit(OperationKind::Sync, Category::Pallet, Vec::new()),
            Err(SyncError::EmptyInput)
        ));
        assert!(matches!(
            coord.submit_named(OperationKind::Sync, "widgets", packages(1)),
            Err(SyncError::InvalidCategory(_))
        ));
        assert!(matches!(
            coord.submit(OperationKind::Sync, Category::Pallet, packages(2)),
            Err(SyncError::InvalidCategory(ref m)) if m.contains("package")
        ));
        assert!(coord.store().is_empty());
    }

    #[test]
    fn unknown_ids() {
        let (coord, _) = coordinator(Arc::new(Refusing), fast_config());

        assert!(coord.status("nope").is_none());
        assert!(!coord.pause("nope").unwrap());
        assert!(!coord.resume("nope").unwrap());
        assert!(coord.wait("nope", Duration::from_millis(1)).is_none());
        assert!(matches!(
            coord.retry_failed_only("nope"),
            Err(SyncError::TransferNotFound(_))
        ));
    }

    #[test]
    fn retry_failed_only_requires_failed_transfer() {
        let transport = Arc::new(Accepting {
            sent: Mutex::new(Vec::new()),
        });
        let (coord, _) = coordinator(transport, fast_config());
        let id = coord
            .submit(OperationKind::Sync, Category::Package, packages(2))
            .unwrap();
        coord.wait(&id, Duration::from_secs(10));

        assert!(matches!(
            coord.retry_failed_only(&id),
            Err(SyncError::InvalidState { .. })
        ));
    }

    #[test]
    fn cleanup_removes_only_finished() {
        let (coord, clock) = coordinator(Arc::new(Refusing), fast_config());
        let id = coord
            .submit(OperationKind::Sync, Category::Package, packages(2))
            .unwrap();
        coord.wait(&id, Duration::from_secs(10));

        let day = Duration::from_secs(86_400);
        assert_eq!(coord.cleanup(day).unwrap(), 0);

        clock.advance(day * 2);
        assert_eq!(coord.cleanup(day).unwrap(), 1);
        assert!(coord.status(&id).is_none());
        assert!(coord.chunks(&id).is_empty());
        assert_eq!(coord.cleanup(day).unwrap(), 0);
    }
}
