//! Cleanup command implementation.

use super::{format_ms, CommandResult};
use std::path::Path;
use std::time::Duration;
use stockferry_core::{
    duration_ms, Clock, IntegrityStore, StateStore, StoreConfig, SystemClock, INTEGRITY_LOG,
    TRANSFERS_LOG,
};
use tracing::info;

/// Runs the cleanup command.
///
/// Only completed and failed transfers are removed; unfinished ones are
/// left alone whatever their age.
pub fn run(path: &Path, older_than_days: u64, dry_run: bool) -> CommandResult {
    let age = Duration::from_secs(older_than_days * 86_400);
    let cutoff = SystemClock.now_ms().saturating_sub(duration_ms(age));

    println!("Cleaning up {:?} (cutoff {})", path, format_ms(cutoff));
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    if path.join(TRANSFERS_LOG).exists() {
        let store = StateStore::open_dir(path, StoreConfig::default())?;
        let stale = store.terminal_before(cutoff);
        let mut removed = 0;
        if !dry_run {
            for id in &stale {
                if store.delete_transfer(id)? {
                    removed += 1;
                }
            }
        }
        info!(candidates = stale.len(), removed, "transfer cleanup");
        println!("Finished transfers older than {older_than_days} days: {}", stale.len());
        for id in &stale {
            println!("  {id}");
        }
    }

    if path.join(INTEGRITY_LOG).exists() {
        let store = IntegrityStore::open_dir(path, StoreConfig::default())?;
        if dry_run {
            let issues = store
                .issues()
                .iter()
                .filter(|i| i.resolved_at.is_some_and(|at| at < cutoff))
                .count();
            let repairs = store
                .repairs()
                .iter()
                .filter(|r| r.started_at < cutoff)
                .count();
            println!("Integrity history rows: {}", issues + repairs);
        } else {
            let dropped = store.drop_history_before(cutoff)?;
            println!("Integrity history rows: {dropped}");
        }
    }
    Ok(())
}
