//! A transport whose behaviour is scripted per chunk index.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stockferry_sync_engine::{ChunkAck, ChunkRequest, SyncError, SyncResult, Transport};

/// One send as the transport saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentChunk {
    /// Owning transfer.
    pub transfer_id: String,
    /// Chunk index.
    pub chunk_index: u32,
    /// Number of items in the request.
    pub items: usize,
    /// Whether the send was acknowledged.
    pub accepted: bool,
}

#[derive(Default)]
struct Script {
    /// Remaining retryable failures per chunk index.
    failures: HashMap<u32, u32>,
    always_fail: bool,
    fatal: bool,
    gates: HashMap<u32, Gate>,
    sent: Vec<SentChunk>,
}

/// Deterministic [`Transport`] for tests.
///
/// Clones share the same script and send log, so a test keeps one handle
/// while the engine owns another.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    elapsed: Duration,
    bytes_per_item: u64,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// A transport that accepts everything, reporting 10ms and 1KB per item.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            elapsed: Duration::from_millis(10),
            bytes_per_item: 1024,
        }
    }

    /// Reported time per send.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Reported bytes per item.
    pub fn with_bytes_per_item(mut self, bytes: u64) -> Self {
        self.bytes_per_item = bytes;
        self
    }

    /// Makes the next `times` sends of chunk `index` fail with a retryable
    /// error.
    pub fn fail_chunk(self, index: u32, times: u32) -> Self {
        self.script.lock().failures.insert(index, times);
        self
    }

    /// Makes every send fail with a retryable error.
    pub fn always_fail(self) -> Self {
        self.script.lock().always_fail = true;
        self
    }

    /// Makes failures non-retryable.
    pub fn fatal(self) -> Self {
        self.script.lock().fatal = true;
        self
    }

    /// Holds sends of chunk `index` until the returned gate is released.
    pub fn gate(&self, index: u32) -> Gate {
        let gate = Gate::default();
        self.script.lock().gates.insert(index, gate.clone());
        gate
    }

    /// Every send so far, in order.
    pub fn sent(&self) -> Vec<SentChunk> {
        self.script.lock().sent.clone()
    }

    /// Indices of the accepted chunks of one transfer, in send order.
    pub fn accepted_indices(&self, transfer_id: &str) -> Vec<u32> {
        self.script
            .lock()
            .sent
            .iter()
            .filter(|s| s.accepted && s.transfer_id == transfer_id)
            .map(|s| s.chunk_index)
            .collect()
    }

    /// Number of send attempts for one chunk of one transfer.
    pub fn attempts(&self, transfer_id: &str, chunk_index: u32) -> usize {
        self.script
            .lock()
            .sent
            .iter()
            .filter(|s| s.transfer_id == transfer_id && s.chunk_index == chunk_index)
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &ChunkRequest<'_>) -> SyncResult<ChunkAck> {
        let gate = self.script.lock().gates.get(&request.chunk_index).cloned();
        if let Some(gate) = gate {
            gate.pass();
        }

        let mut script = self.script.lock();
        let fail = script.always_fail
            || match script.failures.get_mut(&request.chunk_index) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            };
        script.sent.push(SentChunk {
            transfer_id: request.transfer_id.to_string(),
            chunk_index: request.chunk_index,
            items: request.items.len(),
            accepted: !fail,
        });

        if fail {
            let message = format!("scripted failure for chunk {}", request.chunk_index);
            return Err(if script.fatal {
                SyncError::transport_fatal(message)
            } else {
                SyncError::transport_retryable(message)
            });
        }
        Ok(ChunkAck {
            bytes: self.bytes_per_item * request.items.len() as u64,
            elapsed: Some(self.elapsed),
        })
    }
}

#[derive(Default)]
struct GateState {
    entered: bool,
    released: bool,
}

/// Holds a chunk in flight until released.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl Gate {
    fn pass(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        state.entered = true;
        cvar.notify_all();
        while !state.released {
            cvar.wait(&mut state);
        }
    }

    /// Waits until a send has reached the gate. Returns `false` on timeout.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock();
        while !state.entered {
            if cvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.entered
    }

    /// Lets held and future sends through.
    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().released = true;
        cvar.notify_all();
    }
}
