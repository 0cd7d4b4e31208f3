//! Checksum-based integrity checks.
//!
//! Each local record gets a [`DataChecksum`] made of three hashes: one over
//! its content fields, one over its metadata fields and one over the whole
//! record. Comparing a fresh checksum to the stored one tells content
//! corruption apart from metadata drift; a stored checksum with no local
//! record means the record went missing.

mod checksum;
mod store;
mod verifier;

pub use checksum::{DataChecksum, CONTENT_SLICE_SIZE};
pub use store::{IntegrityIssue, IntegrityStore, IssueKind, RepairRecord, Severity, INTEGRITY_LOG};
pub use verifier::{
    IntegrityReport, IntegrityStatistics, IntegrityVerifier, LocalRecordSource,
    MemoryRecordSource, Tally, DATA_REPAIR, LOCAL_DATA_MISSING,
};
