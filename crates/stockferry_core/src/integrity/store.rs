//! Persistent checksum, issue and repair tables.

use super::checksum::DataChecksum;
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::{Frame, FrameLog};
use crate::record::Category;
use crate::state_store::CompactionStats;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use stockferry_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{info, warn};

/// File name of the integrity log inside a store directory.
pub const INTEGRITY_LOG: &str = "integrity.log";

const KIND_CHECKSUM: u8 = 1;
const KIND_ISSUE: u8 = 2;
const KIND_REPAIR: u8 = 3;
const KIND_DROP_ISSUE: u8 = 4;
const KIND_DROP_REPAIR: u8 = 5;

/// Kind of integrity problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Content fields changed since the checksum was taken.
    DataCorruption,
    /// Only metadata fields changed.
    MetadataMismatch,
    /// A checksum exists but the local record is gone.
    MissingData,
}

impl IssueKind {
    /// Severity attached to this kind.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::MetadataMismatch => Severity::Medium,
            Self::DataCorruption | Self::MissingData => Severity::High,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataCorruption => "data_corruption",
            Self::MetadataMismatch => "metadata_mismatch",
            Self::MissingData => "missing_data",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Needs attention eventually.
    Medium,
    /// Needs attention now.
    High,
}

/// A detected integrity problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Row id.
    pub id: u64,
    /// Affected record.
    pub item_id: String,
    /// Category of the affected record.
    pub category: Category,
    /// What went wrong.
    pub kind: IssueKind,
    /// How bad it is.
    pub severity: Severity,
    /// Human-readable summary.
    pub description: String,
    /// Detection time, ms since epoch.
    pub detected_at: u64,
    /// Resolution time, if resolved.
    pub resolved_at: Option<u64>,
}

impl IntegrityIssue {
    /// True until a repair resolves it.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// One repair attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRecord {
    /// Row id.
    pub id: u64,
    /// Repaired record.
    pub item_id: String,
    /// Category of the repaired record.
    pub category: Category,
    /// Repair strategy.
    pub repair_type: String,
    /// Start time, ms since epoch.
    pub started_at: u64,
    /// Completion time, ms since epoch.
    pub completed_at: Option<u64>,
    /// Whether the repair worked.
    pub success: bool,
    /// Failure reason.
    pub error_message: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct DropRow {
    id: u64,
}

#[derive(Default)]
struct Tables {
    checksums: HashMap<(Category, String), DataChecksum>,
    issues: BTreeMap<u64, IntegrityIssue>,
    repairs: BTreeMap<u64, RepairRecord>,
}

impl Tables {
    fn apply(&mut self, frame: &Frame) -> CoreResult<()> {
        match frame.kind {
            KIND_CHECKSUM => {
                let row: DataChecksum = frame.decode()?;
                self.checksums
                    .insert((row.category, row.item_id.clone()), row);
            }
            KIND_ISSUE => {
                let row: IntegrityIssue = frame.decode()?;
                self.issues.insert(row.id, row);
            }
            KIND_REPAIR => {
                let row: RepairRecord = frame.decode()?;
                self.repairs.insert(row.id, row);
            }
            KIND_DROP_ISSUE => {
                let row: DropRow = frame.decode()?;
                self.issues.remove(&row.id);
            }
            KIND_DROP_REPAIR => {
                let row: DropRow = frame.decode()?;
                self.repairs.remove(&row.id);
            }
            other => {
                return Err(CoreError::serialization(format!(
                    "unknown integrity log frame kind {other}"
                )))
            }
        }
        Ok(())
    }

    fn next_issue_id(&self) -> u64 {
        self.issues.keys().next_back().map_or(1, |id| id + 1)
    }

    fn next_repair_id(&self) -> u64 {
        self.repairs.keys().next_back().map_or(1, |id| id + 1)
    }
}

struct Inner {
    log: FrameLog,
    tables: Tables,
    // Ids stay monotonic even after rows are dropped.
    next_issue: u64,
    next_repair: u64,
}

impl Inner {
    fn write(&mut self, frame: Frame) -> CoreResult<()> {
        self.log.append(&frame)?;
        self.tables.apply(&frame)?;
        if self.log.wants_compaction() {
            if let Err(e) = self.compact() {
                warn!(error = %e, "automatic compaction of integrity log failed");
                self.log.postpone_compaction();
            }
        }
        Ok(())
    }

    fn compact(&mut self) -> CoreResult<CompactionStats> {
        let bytes_before = self.log.size()?;
        let mut frames = Vec::new();
        let mut checksums: Vec<&DataChecksum> = self.tables.checksums.values().collect();
        checksums.sort_by(|a, b| (a.category, &a.item_id).cmp(&(b.category, &b.item_id)));
        for checksum in checksums {
            frames.push(Frame::encode(KIND_CHECKSUM, checksum)?);
        }
        for issue in self.tables.issues.values() {
            frames.push(Frame::encode(KIND_ISSUE, issue)?);
        }
        for repair in self.tables.repairs.values() {
            frames.push(Frame::encode(KIND_REPAIR, repair)?);
        }
        self.log.rewrite(&frames)?;
        let bytes_after = self.log.size()?;
        info!(bytes_before, bytes_after, "integrity log compacted");
        Ok(CompactionStats {
            bytes_before,
            bytes_after,
        })
    }
}

/// Durable tables behind the integrity verifier.
pub struct IntegrityStore {
    inner: Mutex<Inner>,
}

impl fmt::Debug for IntegrityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("IntegrityStore")
            .field("checksums", &inner.tables.checksums.len())
            .field("issues", &inner.tables.issues.len())
            .field("repairs", &inner.tables.repairs.len())
            .finish()
    }
}

impl IntegrityStore {
    /// Opens a store over any backend.
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
        let next_issue = tables.next_issue_id();
        let next_repair = tables.next_repair_id();
        Ok(Self {
            inner: Mutex::new(Inner {
                log,
                tables,
                next_issue,
                next_repair,
            }),
        })
    }

    /// Opens `dir/integrity.log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replayed.
    pub fn open_dir(dir: &Path, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open(&dir.join(INTEGRITY_LOG))?;
        Self::open(Box::new(backend), config)
    }

    /// Creates an empty, non-durable store.
    ///
    /// # Errors
    ///
    /// Never fails in practice.
    pub fn in_memory() -> CoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Stores or overwrites a checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn put_checksum(&self, checksum: &DataChecksum) -> CoreResult<()> {
        self.inner
            .lock()
            .write(Frame::encode(KIND_CHECKSUM, checksum)?)
    }

    /// Looks up a checksum.
    #[must_use]
    pub fn checksum(&self, category: Category, item_id: &str) -> Option<DataChecksum> {
        self.inner
            .lock()
            .tables
            .checksums
            .get(&(category, item_id.to_string()))
            .cloned()
    }

    /// Checksums of one category, or all of them.
    #[must_use]
    pub fn checksums(&self, category: Option<Category>) -> Vec<DataChecksum> {
        let inner = self.inner.lock();
        let mut rows: Vec<DataChecksum> = inner
            .tables
            .checksums
            .values()
            .filter(|c| category.map_or(true, |cat| c.category == cat))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.category, &a.item_id).cmp(&(b.category, &b.item_id)));
        rows
    }

    /// Records an issue unless an open one of the same kind already exists
    /// for the item. Returns the stored row either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn record_issue(
        &self,
        item_id: &str,
        category: Category,
        kind: IssueKind,
        description: impl Into<String>,
        now_ms: u64,
    ) -> CoreResult<IntegrityIssue> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.tables.issues.values().find(|i| {
            i.is_open() && i.kind == kind && i.category == category && i.item_id == item_id
        }) {
            return Ok(existing.clone());
        }
        let issue = IntegrityIssue {
            id: inner.next_issue,
            item_id: item_id.to_string(),
            category,
            kind,
            severity: kind.severity(),
            description: description.into(),
            detected_at: now_ms,
            resolved_at: None,
        };
        inner.write(Frame::encode(KIND_ISSUE, &issue)?)?;
        inner.next_issue += 1;
        Ok(issue)
    }

    /// Marks every open issue of an item resolved. Returns how many were.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame cannot be written.
    pub fn resolve_issues(&self, item_id: &str, category: Category, now_ms: u64) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let open: Vec<IntegrityIssue> = inner
            .tables
            .issues
            .values()
            .filter(|i| i.is_open() && i.category == category && i.item_id == item_id)
            .cloned()
            .collect();
        for mut issue in open.iter().cloned() {
            issue.resolved_at = Some(now_ms);
            inner.write(Frame::encode(KIND_ISSUE, &issue)?)?;
        }
        Ok(open.len())
    }

    /// Every issue, oldest first.
    #[must_use]
    pub fn issues(&self) -> Vec<IntegrityIssue> {
        self.inner.lock().tables.issues.values().cloned().collect()
    }

    /// Appends a repair row and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn start_repair(
        &self,
        item_id: &str,
        category: Category,
        repair_type: &str,
        now_ms: u64,
    ) -> CoreResult<RepairRecord> {
        let mut inner = self.inner.lock();
        let repair = RepairRecord {
            id: inner.next_repair,
            item_id: item_id.to_string(),
            category,
            repair_type: repair_type.to_string(),
            started_at: now_ms,
            completed_at: None,
            success: false,
            error_message: None,
        };
        inner.write(Frame::encode(KIND_REPAIR, &repair)?)?;
        inner.next_repair += 1;
        Ok(repair)
    }

    /// Writes the final state of a repair row.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn finish_repair(&self, repair: &RepairRecord) -> CoreResult<()> {
        self.inner.lock().write(Frame::encode(KIND_REPAIR, repair)?)
    }

    /// Every repair row, oldest first.
    #[must_use]
    pub fn repairs(&self) -> Vec<RepairRecord> {
        self.inner.lock().tables.repairs.values().cloned().collect()
    }

    /// Drops resolved issues and repair rows from before `cutoff_ms`.
    /// Returns the number of rows dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame cannot be written.
    pub fn drop_history_before(&self, cutoff_ms: u64) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let issues: Vec<u64> = inner
            .tables
            .issues
            .values()
            .filter(|i| i.resolved_at.is_some_and(|at| at < cutoff_ms))
            .map(|i| i.id)
            .collect();
        let repairs: Vec<u64> = inner
            .tables
            .repairs
            .values()
            .filter(|r| r.started_at < cutoff_ms)
            .map(|r| r.id)
            .collect();

        for id in &issues {
            inner.write(Frame::encode(KIND_DROP_ISSUE, &DropRow { id: *id })?)?;
        }
        for id in &repairs {
            inner.write(Frame::encode(KIND_DROP_REPAIR, &DropRow { id: *id })?)?;
        }
        Ok(issues.len() + repairs.len())
    }

    /// Rewrites the log with only the live rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        self.inner.lock().compact()
    }
}
