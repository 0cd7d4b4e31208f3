//! Transfer and chunk rows.

use crate::error::CoreResult;
use crate::record::{Category, OperationKind, Record};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use stockferry_codec::Canonical;

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Registered, no worker has picked it up yet.
    Pending,
    /// A worker is sending chunks.
    InProgress,
    /// Stopped between chunks, resumable.
    Paused,
    /// Every item was delivered.
    Completed,
    /// Every item was attempted and at least one failed.
    Failed,
}

impl TransferStatus {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Only a running transfer can be paused. Terminal states have no way
    /// out.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TransferStatus::{Completed, Failed, InProgress, Paused, Pending};
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Paused)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Paused, InProgress)
        )
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one transfer.
///
/// The item snapshot is stored next to this row, not inside it, so status
/// updates stay small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// 16 hex chars.
    pub transfer_id: String,
    /// What the remote side does with the items.
    pub operation_kind: OperationKind,
    /// Category of every item.
    pub category: Category,
    /// Number of items in the snapshot.
    pub total_items: u64,
    /// Items in completed chunks.
    pub completed_items: u64,
    /// Items in failed chunks.
    pub failed_items: u64,
    /// Size used for the next chunk to be created.
    pub chunk_size: u32,
    /// Snapshot items already assigned to persisted chunks.
    pub materialized_items: u64,
    /// Current lifecycle state.
    pub status: TransferStatus,
    /// SHA-256 (hex) of the canonical encoding of the item set.
    pub checksum: String,
    /// Creation time, ms since epoch.
    pub created_at: u64,
    /// Last persisted change, ms since epoch.
    pub last_update: u64,
    /// Set only when `status` is `Failed`.
    pub error_message: Option<String>,
    /// Monitor evaluation this transfer last adopted a size from.
    #[serde(default)]
    pub adopted_evaluation: u64,
}

impl TransferRecord {
    /// Items not yet delivered or failed.
    #[must_use]
    pub fn remaining_items(&self) -> u64 {
        self.total_items
            .saturating_sub(self.completed_items + self.failed_items)
    }

    /// Fraction of items delivered, in `[0, 1]`.
    #[must_use]
    pub fn completion_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.completed_items as f64 / self.total_items as f64
    }

    /// True once every item has an outcome.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.remaining_items() == 0
    }

    /// Moves to `next` if [`TransferStatus::can_transition_to`] allows it.
    /// Returns whether the status changed.
    pub fn transition_to(&mut self, next: TransferStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}

/// Outcome of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Not yet delivered.
    Pending,
    /// Delivered.
    Completed,
    /// Retries exhausted or a permanent error.
    Failed,
}

/// Persisted progress of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Owning transfer.
    pub transfer_id: String,
    /// Dense, 0-based position.
    pub chunk_index: u32,
    /// Offset of the first item in the transfer snapshot.
    pub start: u64,
    /// The items carried by this chunk.
    pub payload: Vec<Record>,
    /// Current outcome.
    pub status: ChunkStatus,
    /// Number of sends so far.
    pub attempts: u32,
    /// Time of the last send, ms since epoch.
    pub last_attempt: Option<u64>,
    /// Last error, if any.
    pub error_message: Option<String>,
}

impl ChunkRecord {
    /// Creates a pending chunk.
    #[must_use]
    pub fn new(transfer_id: impl Into<String>, chunk_index: u32, start: u64, payload: Vec<Record>) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            chunk_index,
            start,
            payload,
            status: ChunkStatus::Pending,
            attempts: 0,
            last_attempt: None,
            error_message: None,
        }
    }

    /// Number of items in the chunk.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// True if the chunk carries no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Key the remote side can use to deduplicate a resent chunk.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.transfer_id, self.chunk_index)
    }
}

/// Derives a transfer id from the submission parameters.
///
/// Not security sensitive; `seq` disambiguates submissions in the same
/// nanosecond.
#[must_use]
pub fn transfer_id(
    operation: OperationKind,
    category: Category,
    count: usize,
    nanos: u128,
    seq: u64,
) -> String {
    let input = format!("{operation}_{category}_{count}_{nanos}_{seq}");
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// SHA-256 (hex) of the canonical encoding of `items`.
///
/// # Errors
///
/// Returns an error if a record cannot be canonically encoded.
pub fn items_checksum(items: &[Record]) -> CoreResult<String> {
    let bytes = items.canonical_bytes()?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Component;

    fn item(id: &str) -> Record {
        Record::Component(Component {
            id: id.into(),
            name: format!("part {id}"),
            ..Component::default()
        })
    }

    #[test]
    fn terminal_states_are_final() {
        use TransferStatus::*;
        for next in [Pending, InProgress, Paused, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Paused));
    }

    #[test]
    fn transition_to_rejects_illegal_moves() {
        let mut record = TransferRecord {
            transfer_id: "t".into(),
            operation_kind: OperationKind::Sync,
            category: Category::Component,
            total_items: 5,
            completed_items: 3,
            failed_items: 0,
            chunk_size: 2,
            materialized_items: 4,
            status: TransferStatus::Pending,
            checksum: String::new(),
            created_at: 0,
            last_update: 0,
            error_message: None,
            adopted_evaluation: 0,
        };
        assert!(!record.transition_to(TransferStatus::Paused));
        assert_eq!(record.status, TransferStatus::Pending);
        assert!(record.transition_to(TransferStatus::InProgress));
        assert!(record.transition_to(TransferStatus::Paused));
        assert!(!record.transition_to(TransferStatus::Completed));
        assert_eq!(record.status, TransferStatus::Paused);

        assert_eq!(record.remaining_items(), 2);
        assert!(!record.is_settled());
        record.failed_items = 2;
        assert!(record.is_settled());
    }

    #[test]
    fn transfer_id_shape() {
        let a = transfer_id(OperationKind::Sync, Category::Component, 10, 123, 0);
        let b = transfer_id(OperationKind::Sync, Category::Component, 10, 123, 1);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_depends_on_order_of_items_only() {
        let one = items_checksum(&[item("a"), item("b")]).unwrap();
        let same = items_checksum(&[item("a"), item("b")]).unwrap();
        let swapped = items_checksum(&[item("b"), item("a")]).unwrap();
        assert_eq!(one, same);
        assert_ne!(one, swapped);
        assert_eq!(one.len(), 64);
    }

    #[test]
    fn idempotency_key_format() {
        let chunk = ChunkRecord::new("abcd", 3, 30, vec![item("x")]);
        assert_eq!(chunk.idempotency_key(), "abcd:3");
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.status, ChunkStatus::Pending);
    }
}
