//! Compact command implementation.

use super::CommandResult;
use std::path::Path;
use stockferry_core::{
    CompactionStats, IntegrityStore, StateStore, StoreConfig, INTEGRITY_LOG, TRANSFERS_LOG,
};

/// Runs the compact command.
pub fn run(path: &Path) -> CommandResult {
    let mut any = false;

    if path.join(TRANSFERS_LOG).exists() {
        let store = StateStore::open_dir(path, StoreConfig::default())?;
        print_stats(TRANSFERS_LOG, &store.compact()?);
        any = true;
    }
    if path.join(INTEGRITY_LOG).exists() {
        let store = IntegrityStore::open_dir(path, StoreConfig::default())?;
        print_stats(INTEGRITY_LOG, &store.compact()?);
        any = true;
    }

    if !any {
        return Err(format!("No stockferry logs found at {:?}", path).into());
    }
    Ok(())
}

fn print_stats(name: &str, stats: &CompactionStats) {
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("{name}:");
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
}
