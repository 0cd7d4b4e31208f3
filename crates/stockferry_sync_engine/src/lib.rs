//! # stockferry sync engine
//!
//! Adaptive, resumable chunked transfers for stockferry.
//!
//! This crate provides:
//! - Transfer coordination (submit, pause, resume, recover, cleanup)
//! - Lazy chunking over a persisted item snapshot
//! - Retry with exponential backoff and jitter
//! - A network monitor that derives per-lane chunk size recommendations
//! - A planner that resizes chunks between sends
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! A transfer moves through `pending → in_progress → {paused ↔ in_progress}
//! → completed | failed`. One worker thread drives each running transfer:
//! it cuts the next chunk, sends it with retries, reports the outcome to the
//! [`NetworkMonitor`], and asks the [`ChunkPlanner`] for the next size.
//!
//! ## Key Invariants
//!
//! - State is persisted before it is acted on
//! - Chunks of a transfer tile its snapshot with no gap or overlap
//! - A completed chunk is never sent again by the same transfer
//! - Chunk sizes always stay within the configured bounds
//! - Sends are idempotent per `{transfer_id}:{chunk_index}`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod http;
mod monitor;
mod planner;
mod transport;

pub use config::{ChunkBounds, MonitorConfig, PlannerConfig, RetryConfig, SyncConfig};
pub use coordinator::{IncompleteTransfer, TransferCoordinator};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport};
pub use monitor::{ChunkOutcome, Lane, NetworkCondition, NetworkMonitor, PerformanceReport};
pub use planner::{ChunkPlanner, SizeDecision, SizeReason};
pub use transport::{ChunkAck, ChunkRequest, Transport};
