//! # stockferry_core
//!
//! Domain records, durable transfer state and integrity checks.
//!
//! - [`record`]: the closed set of record categories and their field split
//! - [`StateStore`]: transfers, item snapshots and chunk progress in one
//!   append-only log
//! - [`integrity`]: checksums that tell content corruption from metadata
//!   drift from missing records
//!
//! Every table is replayed from a CRC-framed log on open, so a process can
//! be killed at any point and reopen at the last fully written frame.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
pub mod integrity;
pub mod log;
pub mod record;
mod state_store;
mod transfer;

pub use clock::{duration_ms, Clock, ManualClock, SystemClock};
pub use config::{StoreConfig, DEFAULT_COMPACT_THRESHOLD};
pub use error::{CoreError, CoreResult};
pub use integrity::{
    DataChecksum, IntegrityIssue, IntegrityReport, IntegrityStatistics, IntegrityStore,
    IntegrityVerifier, IssueKind, LocalRecordSource, MemoryRecordSource, RepairRecord, Severity,
    INTEGRITY_LOG,
};
pub use record::{Category, Component, OperationKind, Package, Pallet, Record};
pub use state_store::{CompactionStats, StateStore, TRANSFERS_LOG};
pub use transfer::{
    items_checksum, transfer_id, ChunkRecord, ChunkStatus, TransferRecord, TransferStatus,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
