//! Inspect command implementation.

use super::{print_json, CommandResult};
use serde::Serialize;
use std::path::Path;
use stockferry_core::log::scan;
use stockferry_core::{StateStore, StoreConfig, TransferStatus, INTEGRITY_LOG, TRANSFERS_LOG};
use stockferry_storage::{FileBackend, StorageBackend};

/// State directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Per-log statistics.
    pub logs: Vec<LogStats>,
    /// Transfers per status.
    pub transfers: Vec<(String, usize)>,
}

/// Statistics for one log file.
#[derive(Debug, Serialize)]
pub struct LogStats {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Complete frames.
    pub frames: usize,
    /// Whether a partially written frame trails the log.
    pub torn_tail: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult {
    let mut logs = Vec::new();
    for name in [TRANSFERS_LOG, INTEGRITY_LOG] {
        let file = path.join(name);
        if file.exists() {
            logs.push(log_stats(&file, name)?);
        }
    }
    if logs.is_empty() {
        return Err(format!("No stockferry logs found at {:?}", path).into());
    }

    let mut transfers = Vec::new();
    if path.join(TRANSFERS_LOG).exists() {
        let store = StateStore::open_dir(path, StoreConfig::default())?;
        let rows = store.transfers();
        for status in [
            TransferStatus::Pending,
            TransferStatus::InProgress,
            TransferStatus::Paused,
            TransferStatus::Completed,
            TransferStatus::Failed,
        ] {
            let count = rows.iter().filter(|t| t.status == status).count();
            transfers.push((status.to_string(), count));
        }
    }

    let result = InspectResult {
        path: path.display().to_string(),
        logs,
        transfers,
    };
    match format {
        "json" => print_json(&result)?,
        _ => print_text_output(&result),
    }
    Ok(())
}

fn log_stats(file: &Path, name: &str) -> CommandResult<LogStats> {
    let backend = FileBackend::open(file)?;
    let data = backend.read_all()?;
    let parsed = scan(&data)?;
    Ok(LogStats {
        name: name.to_string(),
        size: backend.size()?,
        frames: parsed.frames.len(),
        torn_tail: parsed.torn,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("State directory: {}", result.path);
    println!();
    for log in &result.logs {
        println!("{}:", log.name);
        println!("  Size:   {} bytes", log.size);
        println!("  Frames: {}", log.frames);
        if log.torn_tail {
            println!("  Torn tail present (truncated on next open)");
        }
    }
    if !result.transfers.is_empty() {
        println!();
        println!("Transfers:");
        for (status, count) in &result.transfers {
            println!("  {:<12} {}", status, count);
        }
    }
}
