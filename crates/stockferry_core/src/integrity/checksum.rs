//! Per-record checksums.

use crate::error::CoreResult;
use crate::record::{Category, Record};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stockferry_codec::{to_canonical_cbor, Canonical};

/// Size of one content slice in `chunk_hashes`.
pub const CONTENT_SLICE_SIZE: usize = 1000;

/// Stored fingerprint of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChecksum {
    /// Record id.
    pub item_id: String,
    /// Record category.
    pub category: Category,
    /// Hash of the content fields.
    pub content_hash: String,
    /// Hash of the metadata fields.
    pub metadata_hash: String,
    /// Hash of the whole record.
    pub total_hash: String,
    /// Number of entries in `chunk_hashes`.
    pub chunk_count: u32,
    /// Hashes of consecutive slices of the encoded content.
    pub chunk_hashes: Vec<String>,
    /// When the checksum was first computed, ms since epoch.
    pub created_at: u64,
    /// Last time the record was found unchanged.
    pub verified_at: Option<u64>,
    /// False once the record is known to be missing locally.
    pub is_complete: bool,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl DataChecksum {
    /// Computes the checksum of `record` as of `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be canonically encoded.
    pub fn compute(record: &Record, now_ms: u64) -> CoreResult<Self> {
        let content = to_canonical_cbor(&record.content_value())?;
        let metadata = to_canonical_cbor(&record.metadata_value())?;
        let total = record.canonical_bytes()?;

        let chunk_hashes: Vec<String> = content.chunks(CONTENT_SLICE_SIZE).map(sha256_hex).collect();

        Ok(Self {
            item_id: record.id().to_string(),
            category: record.category(),
            content_hash: sha256_hex(&content),
            metadata_hash: sha256_hex(&metadata),
            total_hash: sha256_hex(&total),
            chunk_count: chunk_hashes.len() as u32,
            chunk_hashes,
            created_at: now_ms,
            verified_at: None,
            is_complete: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Component;

    fn component(description: &str, updated_at: &str) -> Record {
        Record::Component(Component {
            id: "c-1".into(),
            name: "LM317".into(),
            description: Some(description.into()),
            updated_at: Some(updated_at.into()),
            ..Component::default()
        })
    }

    #[test]
    fn metadata_change_keeps_content_hash() {
        let a = DataChecksum::compute(&component("regulator", "2024-01-01"), 0).unwrap();
        let b = DataChecksum::compute(&component("regulator", "2024-02-01"), 0).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.metadata_hash, b.metadata_hash);
        assert_ne!(a.total_hash, b.total_hash);
    }

    #[test]
    fn content_change_moves_content_hash() {
        let a = DataChecksum::compute(&component("regulator", "2024-01-01"), 0).unwrap();
        let b = DataChecksum::compute(&component("regulator!", "2024-01-01"), 0).unwrap();
        assert_ne!(a.content_hash, b.content_hash);
        assert_eq!(a.metadata_hash, b.metadata_hash);
    }

    #[test]
    fn long_content_is_sliced() {
        let long = "x".repeat(2 * CONTENT_SLICE_SIZE + 10);
        let sum = DataChecksum::compute(&component(&long, "t"), 0).unwrap();
        assert_eq!(sum.chunk_count, 3);
        assert_eq!(sum.chunk_hashes.len(), 3);

        let short = DataChecksum::compute(&component("short", "t"), 0).unwrap();
        assert_eq!(short.chunk_count, 1);
    }
}
