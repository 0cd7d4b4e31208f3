//! Integrity verification and repair.

use super::checksum::DataChecksum;
use super::store::{IntegrityIssue, IntegrityStore, IssueKind};
use crate::clock::{duration_ms, Clock};
use crate::error::CoreResult;
use crate::record::{Category, Record};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Repair strategy name written to the history.
pub const DATA_REPAIR: &str = "data_repair";

/// Failure text recorded when the local record is gone.
pub const LOCAL_DATA_MISSING: &str = "local data missing";

/// Read access to the locally-held records.
pub trait LocalRecordSource: Send + Sync {
    /// Every record of `category`, or of all categories.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    fn records(&self, category: Option<Category>) -> CoreResult<Vec<Record>>;

    /// One record, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    fn record(&self, category: Category, item_id: &str) -> CoreResult<Option<Record>>;
}

/// A [`LocalRecordSource`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryRecordSource {
    records: RwLock<BTreeMap<(Category, String), Record>>,
}

impl MemoryRecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `records`.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let source = Self::new();
        for record in records {
            source.upsert(record);
        }
        source
    }

    /// Inserts or replaces a record.
    pub fn upsert(&self, record: Record) {
        self.records
            .write()
            .insert((record.category(), record.id().to_string()), record);
    }

    /// Removes a record. Returns whether it existed.
    pub fn remove(&self, category: Category, item_id: &str) -> bool {
        self.records
            .write()
            .remove(&(category, item_id.to_string()))
            .is_some()
    }
}

impl LocalRecordSource for MemoryRecordSource {
    fn records(&self, category: Option<Category>) -> CoreResult<Vec<Record>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| category.map_or(true, |c| r.category() == c))
            .cloned()
            .collect())
    }

    fn record(&self, category: Category, item_id: &str) -> CoreResult<Option<Record>> {
        Ok(self
            .records
            .read()
            .get(&(category, item_id.to_string()))
            .cloned())
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    /// Local records examined.
    pub total_items: usize,
    /// Records matching their checksum, or seen for the first time.
    pub complete_items: usize,
    /// Records whose metadata drifted.
    pub incomplete_items: usize,
    /// Records whose content changed.
    pub corrupted_items: usize,
    /// Checksums with no local record. Not part of `total_items`.
    pub missing_items: usize,
    /// `complete / total * 100`, or 100 for an empty set.
    pub integrity_score: f64,
    /// Itemized findings.
    pub issues: Vec<IntegrityIssue>,
    /// Suggested follow-ups.
    pub recommendations: Vec<String>,
}

/// Row counts by group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// All rows.
    pub total: usize,
    /// Rows that are complete, resolved or successful.
    pub good: usize,
}

/// Aggregate view over the integrity tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityStatistics {
    /// Checksums per category; `good` counts complete ones.
    pub checksums: BTreeMap<Category, Tally>,
    /// Issues per kind; `good` counts resolved ones.
    pub issues: BTreeMap<IssueKind, Tally>,
    /// Repairs per type; `good` counts successful ones.
    pub repairs: BTreeMap<String, Tally>,
}

/// Compares local records against their stored checksums.
pub struct IntegrityVerifier {
    store: IntegrityStore,
    source: Arc<dyn LocalRecordSource>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IntegrityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityVerifier")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl IntegrityVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(
        store: IntegrityStore,
        source: Arc<dyn LocalRecordSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
        }
    }

    /// The underlying tables.
    #[must_use]
    pub fn store(&self) -> &IntegrityStore {
        &self.store
    }

    /// Verifies one category, or all of them.
    ///
    /// Checksums of new records are stored; changed records have their
    /// checksum replaced after the change is reported.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local source or the integrity log fails.
    pub fn verify(&self, category: Option<Category>) -> CoreResult<IntegrityReport> {
        let now = self.clock.now_ms();
        let local = self.source.records(category)?;
        let stored: HashMap<(Category, String), DataChecksum> = self
            .store
            .checksums(category)
            .into_iter()
            .map(|c| ((c.category, c.item_id.clone()), c))
            .collect();

        let mut report = IntegrityReport {
            total_items: local.len(),
            complete_items: 0,
            incomplete_items: 0,
            corrupted_items: 0,
            missing_items: 0,
            integrity_score: 100.0,
            issues: Vec::new(),
            recommendations: Vec::new(),
        };

        let mut seen = HashSet::with_capacity(local.len());
        for record in &local {
            let key = (record.category(), record.id().to_string());
            let current = DataChecksum::compute(record, now)?;
            seen.insert(key.clone());

            let Some(previous) = stored.get(&key) else {
                self.store.put_checksum(&current)?;
                report.complete_items += 1;
                continue;
            };

            if current.total_hash == previous.total_hash {
                let mut refreshed = previous.clone();
                refreshed.verified_at = Some(now);
                refreshed.is_complete = true;
                self.store.put_checksum(&refreshed)?;
                report.complete_items += 1;
                continue;
            }

            let (kind, description) = if current.content_hash == previous.content_hash {
                report.incomplete_items += 1;
                (IssueKind::MetadataMismatch, "metadata checksum mismatch")
            } else {
                report.corrupted_items += 1;
                (IssueKind::DataCorruption, "content checksum mismatch")
            };
            let issue = self
                .store
                .record_issue(&key.1, key.0, kind, description, now)?;
            report.issues.push(issue);
            self.store.put_checksum(&current)?;
        }

        for (key, previous) in &stored {
            if seen.contains(key) {
                continue;
            }
            report.missing_items += 1;
            if previous.is_complete {
                let mut marked = previous.clone();
                marked.is_complete = false;
                self.store.put_checksum(&marked)?;
            }
            let issue = self.store.record_issue(
                &key.1,
                key.0,
                IssueKind::MissingData,
                "checksum recorded but local record missing",
                now,
            )?;
            report.issues.push(issue);
        }
        report.issues.sort_by_key(|i| i.id);

        if report.total_items > 0 {
            report.integrity_score =
                report.complete_items as f64 / report.total_items as f64 * 100.0;
        }
        if report.corrupted_items > 0 {
            report.recommendations.push(format!(
                "{} corrupted item(s): repair now",
                report.corrupted_items
            ));
        }
        if report.incomplete_items > 0 {
            report.recommendations.push(format!(
                "{} incomplete item(s): resync",
                report.incomplete_items
            ));
        }
        if report.missing_items > 0 {
            report.recommendations.push(format!(
                "{} missing item(s): restore from remote",
                report.missing_items
            ));
        }

        info!(
            category = category.map_or("all", Category::as_str),
            total = report.total_items,
            corrupted = report.corrupted_items,
            missing = report.missing_items,
            score = report.integrity_score,
            "integrity verification finished"
        );
        Ok(report)
    }

    /// Recomputes the checksum of one record from the local copy.
    ///
    /// Returns `false` without an error when the local record is missing;
    /// the attempt is still recorded in the repair history.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local source or the integrity log fails.
    pub fn repair(&self, item_id: &str, category: Category) -> CoreResult<bool> {
        let mut repair = self
            .store
            .start_repair(item_id, category, DATA_REPAIR, self.clock.now_ms())?;

        let outcome = self
            .source
            .record(category, item_id)
            .and_then(|local| match local {
                None => Ok(false),
                Some(record) => {
                    let now = self.clock.now_ms();
                    let checksum = DataChecksum::compute(&record, now)?;
                    self.store.put_checksum(&checksum)?;
                    self.store.resolve_issues(item_id, category, now)?;
                    Ok(true)
                }
            });

        repair.completed_at = Some(self.clock.now_ms());
        match &outcome {
            Ok(true) => {
                repair.success = true;
                info!(item_id, %category, "record repaired");
            }
            Ok(false) => {
                repair.error_message = Some(LOCAL_DATA_MISSING.to_string());
                warn!(item_id, %category, reason = LOCAL_DATA_MISSING, "repair failed");
            }
            Err(e) => {
                repair.error_message = Some(e.to_string());
                error!(item_id, %category, error = %e, "repair failed");
            }
        }
        self.store.finish_repair(&repair)?;
        outcome
    }

    /// Counts over the checksum, issue and repair tables.
    #[must_use]
    pub fn statistics(&self) -> IntegrityStatistics {
        let mut stats = IntegrityStatistics::default();
        for checksum in self.store.checksums(None) {
            let tally = stats.checksums.entry(checksum.category).or_default();
            tally.total += 1;
            tally.good += usize::from(checksum.is_complete);
        }
        for issue in self.store.issues() {
            let tally = stats.issues.entry(issue.kind).or_default();
            tally.total += 1;
            tally.good += usize::from(!issue.is_open());
        }
        for repair in self.store.repairs() {
            let tally = stats.repairs.entry(repair.repair_type).or_default();
            tally.total += 1;
            tally.good += usize::from(repair.success);
        }
        stats
    }

    /// Drops resolved issues and repair rows older than `older_than`.
    ///
    /// # Errors
    ///
    /// Returns an error if the integrity log cannot be written.
    pub fn cleanup_history(&self, older_than: Duration) -> CoreResult<usize> {
        let cutoff = self.clock.now_ms().saturating_sub(duration_ms(older_than));
        let dropped = self.store.drop_history_before(cutoff)?;
        info!(dropped, "integrity history cleaned up");
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::{Component, Pallet};

    fn component(id: &str, description: &str, updated_at: &str) -> Record {
        Record::Component(Component {
            id: id.into(),
            name: format!("part {id}"),
            description: Some(description.into()),
            updated_at: Some(updated_at.into()),
            ..Component::default()
        })
    }

    fn setup(records: Vec<Record>) -> (IntegrityVerifier, Arc<MemoryRecordSource>, Arc<ManualClock>) {
        let source = Arc::new(MemoryRecordSource::from_records(records));
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = IntegrityVerifier::new(
            IntegrityStore::in_memory().unwrap(),
            source.clone(),
            clock.clone(),
        );
        (verifier, source, clock)
    }

    #[test]
    fn first_pass_stores_checksums() {
        let (verifier, _, _) = setup(vec![component("a", "x", "t0"), component("b", "y", "t0")]);
        let report = verifier.verify(None).unwrap();
        assert_eq!(report.total_items, 2);
        assert_eq!(report.complete_items, 2);
        assert!((report.integrity_score - 100.0).abs() < f64::EPSILON);
        assert!(report.issues.is_empty());
        assert_eq!(verifier.store().checksums(None).len(), 2);
    }

    #[test]
    fn unchanged_record_refreshes_verified_at() {
        let (verifier, _, clock) = setup(vec![component("a", "x", "t0")]);
        verifier.verify(None).unwrap();
        clock.advance(Duration::from_secs(5));
        verifier.verify(None).unwrap();
        let stored = verifier.store().checksum(Category::Component, "a").unwrap();
        assert_eq!(stored.verified_at, Some(6_000));
        assert_eq!(stored.created_at, 1_000);
    }

    #[test]
    fn repeated_clean_passes_keep_the_log_bounded() {
        use crate::config::StoreConfig;
        use stockferry_storage::InMemoryBackend;

        let records: Vec<Record> = (0..20)
            .map(|i| component(&format!("c-{i}"), "x", "t0"))
            .collect();
        let backend = InMemoryBackend::new();
        let config = StoreConfig::default().compact_threshold(Some(64 * 1024));
        let store = IntegrityStore::open(Box::new(backend.reopen()), config.clone()).unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = IntegrityVerifier::new(
            store,
            Arc::new(MemoryRecordSource::from_records(records)),
            clock.clone(),
        );

        for _ in 0..100 {
            clock.advance(Duration::from_secs(1));
            assert_eq!(verifier.verify(None).unwrap().complete_items, 20);
        }
        assert!((backend.data().len() as u64) < 64 * 1024);

        let reopened = IntegrityStore::open(Box::new(backend.reopen()), config).unwrap();
        assert_eq!(reopened.checksums(None).len(), 20);
        let stored = reopened.checksum(Category::Component, "c-7").unwrap();
        assert_eq!(stored.verified_at, Some(101_000));
    }

    #[test]
    fn classifies_drift_and_corruption() {
        let (verifier, source, _) = setup(vec![
            component("meta", "x", "t0"),
            component("body", "x", "t0"),
            component("same", "x", "t0"),
        ]);
        verifier.verify(Some(Category::Component)).unwrap();

        source.upsert(component("meta", "x", "t1"));
        source.upsert(component("body", "tampered", "t0"));
        let report = verifier.verify(Some(Category::Component)).unwrap();

        assert_eq!(report.total_items, 3);
        assert_eq!(report.complete_items, 1);
        assert_eq!(report.incomplete_items, 1);
        assert_eq!(report.corrupted_items, 1);
        assert_eq!(report.issues.len(), 2);
        let kinds: Vec<IssueKind> = report.issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IssueKind::MetadataMismatch));
        assert!(kinds.contains(&IssueKind::DataCorruption));
        assert_eq!(report.recommendations.len(), 2);
        assert!(report.recommendations[0].contains("repair now"));
        assert!(report.recommendations[1].contains("resync"));

        // New checksums were stored, so a second pass is clean.
        let again = verifier.verify(Some(Category::Component)).unwrap();
        assert_eq!(again.complete_items, 3);
    }

    #[test]
    fn category_filter_ignores_other_categories() {
        let pallet = Record::Pallet(Pallet {
            id: "pl-1".into(),
            name: "rack".into(),
            ..Pallet::default()
        });
        let (verifier, source, _) = setup(vec![component("a", "x", "t0"), pallet]);
        verifier.verify(None).unwrap();
        source.remove(Category::Pallet, "pl-1");

        let report = verifier.verify(Some(Category::Component)).unwrap();
        assert_eq!(report.total_items, 1);
        assert_eq!(report.missing_items, 0);
    }

    #[test]
    fn repair_resolves_issues_and_logs_history() {
        let (verifier, source, _) = setup(vec![component("a", "x", "t0")]);
        verifier.verify(None).unwrap();
        source.upsert(component("a", "changed", "t0"));
        verifier.verify(None).unwrap();

        assert!(verifier.repair("a", Category::Component).unwrap());
        assert!(verifier.store().issues().iter().all(|i| !i.is_open()));
        let history = verifier.store().repairs();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].repair_type, DATA_REPAIR);
    }

    #[test]
    fn repair_of_missing_record_returns_false() {
        let (verifier, _, _) = setup(vec![]);
        assert!(!verifier.repair("ghost", Category::Package).unwrap());
        let history = verifier.store().repairs();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].error_message.as_deref(), Some(LOCAL_DATA_MISSING));
        assert!(history[0].completed_at.is_some());
    }

    #[test]
    fn statistics_and_cleanup() {
        let (verifier, source, clock) = setup(vec![component("a", "x", "t0"), component("b", "x", "t0")]);
        verifier.verify(None).unwrap();
        source.remove(Category::Component, "b");
        verifier.verify(None).unwrap();
        verifier.repair("b", Category::Component).unwrap();

        let stats = verifier.statistics();
        assert_eq!(stats.checksums[&Category::Component], Tally { total: 2, good: 1 });
        assert_eq!(stats.issues[&IssueKind::MissingData], Tally { total: 1, good: 0 });
        assert_eq!(stats.repairs[DATA_REPAIR], Tally { total: 1, good: 0 });

        clock.advance(Duration::from_secs(31 * 24 * 3600));
        // The missing-data issue is still open, so only the repair row goes.
        assert_eq!(verifier.cleanup_history(Duration::from_secs(30 * 24 * 3600)).unwrap(), 1);
        assert_eq!(verifier.store().issues().len(), 1);
    }
}
