//! Record fixtures and engine helpers.
//!
//! Everything here panics on setup failure; it is only meant for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stockferry_core::{
    Category, Clock, Component, ManualClock, Package, Pallet, Record, StateStore, StoreConfig,
};
use stockferry_storage::InMemoryBackend;
use stockferry_sync_engine::{NetworkMonitor, SyncConfig, TransferCoordinator, Transport};
use tempfile::TempDir;

/// Start time of every [`ManualClock`] built here.
pub const FIXTURE_EPOCH_MS: u64 = 1_700_000_000_000;

/// A component with a deterministic id and content.
pub fn component(i: usize) -> Record {
    let mut specifications = BTreeMap::new();
    specifications.insert("voltage".to_string(), format!("{}V", 3 + i % 3));
    Record::Component(Component {
        id: format!("cmp-{i:04}"),
        name: format!("Resistor {i}k"),
        description: Some("0603 thick film".to_string()),
        specifications,
        quantity: (i as i64) * 10,
        category_id: Some(1),
        created_at: Some("2024-01-01T00:00:00".to_string()),
        ..Component::default()
    })
}

/// A package with a deterministic id and content.
pub fn package(i: usize) -> Record {
    Record::Package(Package {
        id: format!("pkg-{i:04}"),
        name: format!("SOIC-{}", 8 + i % 8),
        pin_count: Some(8 + (i % 8) as i64),
        package_type: Some("SMD".to_string()),
        components: vec![format!("cmp-{i:04}")],
        category: Some("ic".to_string()),
        ..Package::default()
    })
}

/// A pallet with a deterministic id and content.
pub fn pallet(i: usize) -> Record {
    Record::Pallet(Pallet {
        id: format!("pal-{i:04}"),
        name: format!("Pallet {i}"),
        components: vec![format!("cmp-{i:04}")],
        location: Some(format!("rack {}", i % 4)),
        version: 1,
        ..Pallet::default()
    })
}

/// `n` records of one category.
pub fn records(category: Category, n: usize) -> Vec<Record> {
    let make = match category {
        Category::Component => component,
        Category::Package => package,
        Category::Pallet => pallet,
    };
    (0..n).map(make).collect()
}

/// Where an engine keeps its state.
enum Backing {
    Memory(InMemoryBackend),
    Dir(TempDir),
}

/// A coordinator wired to a manual clock and a throwaway store.
///
/// [`reopen`](Self::reopen) drops nothing but builds a fresh coordinator over
/// the same persisted bytes, which is how tests simulate a process restart.
pub struct TestEngine {
    /// The coordinator.
    pub coordinator: TransferCoordinator,
    /// The clock every component reads.
    pub clock: Arc<ManualClock>,
    config: SyncConfig,
    backing: Backing,
}

impl TestEngine {
    /// An engine over an in-memory log.
    pub fn in_memory(config: SyncConfig, transport: impl Transport + 'static) -> Self {
        Self::memory_with(InMemoryBackend::new(), config, transport)
    }

    /// An engine over a caller-provided in-memory log; keep a clone of the
    /// backend to inject write failures.
    pub fn memory_with(
        backend: InMemoryBackend,
        config: SyncConfig,
        transport: impl Transport + 'static,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MS));
        let store = StateStore::open(Box::new(backend.reopen()), StoreConfig::default())
            .expect("Failed to open in-memory store");
        Self::assemble(store, clock, config, transport, Backing::Memory(backend))
    }

    /// An engine over a temporary directory.
    pub fn file(config: SyncConfig, transport: impl Transport + 'static) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MS));
        let store = StateStore::open_dir(dir.path(), StoreConfig::default())
            .expect("Failed to open file store");
        Self::assemble(store, clock, config, transport, Backing::Dir(dir))
    }

    /// A new engine over the same persisted state, clock and config, with a
    /// new transport. The old coordinator is dropped.
    pub fn reopen(self, transport: impl Transport + 'static) -> Self {
        let store = match &self.backing {
            Backing::Memory(backend) => {
                StateStore::open(Box::new(backend.reopen()), StoreConfig::default())
            }
            Backing::Dir(dir) => StateStore::open_dir(dir.path(), StoreConfig::default()),
        }
        .expect("Failed to reopen store");
        let Self {
            coordinator,
            clock,
            config,
            backing,
        } = self;
        drop(coordinator);
        Self::assemble(store, clock, config, transport, backing)
    }

    /// State directory, for file-backed engines.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::Dir(dir) => Some(dir.path().to_path_buf()),
            Backing::Memory(_) => None,
        }
    }

    /// Waits for a transfer with a generous timeout and returns its state.
    pub fn settle(&self, transfer_id: &str) -> stockferry_core::TransferRecord {
        self.coordinator
            .wait(transfer_id, Duration::from_secs(30))
            .expect("Unknown transfer")
    }

    fn assemble(
        store: StateStore,
        clock: Arc<ManualClock>,
        config: SyncConfig,
        transport: impl Transport + 'static,
        backing: Backing,
    ) -> Self {
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let monitor = Arc::new(NetworkMonitor::new(
            config.monitor.clone(),
            config.bounds(),
            Arc::clone(&dyn_clock),
        ));
        let coordinator = TransferCoordinator::new(
            config.clone(),
            Arc::new(store),
            Arc::new(transport),
            monitor,
            dyn_clock,
        );
        Self {
            coordinator,
            clock,
            config,
            backing,
        }
    }
}

impl std::ops::Deref for TestEngine {
    type Target = TransferCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs `f` with a temporary directory that is removed afterwards.
pub fn with_temp_dir<F, R>(f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    let dir = TempDir::new().expect("Failed to create temp directory");
    f(dir.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_deterministic() {
        assert_eq!(records(Category::Pallet, 3), records(Category::Pallet, 3));
        let ids: Vec<String> = records(Category::Component, 2)
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["cmp-0000", "cmp-0001"]);
    }

    #[test]
    fn records_match_category() {
        for category in Category::ALL {
            assert!(records(category, 5).iter().all(|r| r.category() == category));
        }
    }
}
