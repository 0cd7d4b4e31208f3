//! Store configuration.

/// Configuration for opening a state or integrity store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the log after every appended frame.
    pub sync_on_write: bool,
    /// Log size that triggers an automatic compaction, `None` to disable.
    /// After each compaction the mark moves to twice the compacted size if
    /// that is larger.
    pub compact_threshold: Option<u64>,
}

/// Default automatic compaction mark, 16 MiB.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 16 * 1024 * 1024;

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold: Some(DEFAULT_COMPACT_THRESHOLD),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether every write is synced before returning.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic compaction mark.
    #[must_use]
    pub const fn compact_threshold(mut self, bytes: Option<u64>) -> Self {
        self.compact_threshold = bytes;
        self
    }
}
