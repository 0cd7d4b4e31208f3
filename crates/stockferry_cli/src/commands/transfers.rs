//! List and status commands.

use super::{format_ms, open_transfers, print_json, CommandResult};
use serde::Serialize;
use std::path::Path;
use stockferry_core::{ChunkRecord, TransferRecord};

/// Runs the list command.
pub fn list(path: &Path, active_only: bool, format: &str) -> CommandResult {
    let store = open_transfers(path)?;
    let rows = if active_only {
        store.non_terminal()
    } else {
        store.transfers()
    };

    if format == "json" {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No transfers");
        return Ok(());
    }
    println!(
        "{:<18} {:<10} {:<10} {:<12} {:>9} {:>7}",
        "ID", "OPERATION", "CATEGORY", "STATUS", "PROGRESS", "CHUNK"
    );
    for t in &rows {
        println!(
            "{:<18} {:<10} {:<10} {:<12} {:>8.1}% {:>7}",
            t.transfer_id,
            t.operation_kind,
            t.category,
            t.status,
            t.completion_rate() * 100.0,
            t.chunk_size
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    transfer: &'a TransferRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ChunkSummary>>,
}

#[derive(Serialize)]
struct ChunkSummary {
    chunk_index: u32,
    start: u64,
    items: u64,
    status: String,
    attempts: u32,
    error_message: Option<String>,
}

impl From<&ChunkRecord> for ChunkSummary {
    fn from(c: &ChunkRecord) -> Self {
        Self {
            chunk_index: c.chunk_index,
            start: c.start,
            items: c.len(),
            status: format!("{:?}", c.status).to_lowercase(),
            attempts: c.attempts,
            error_message: c.error_message.clone(),
        }
    }
}

/// Runs the status command.
pub fn status(path: &Path, id: &str, show_chunks: bool, format: &str) -> CommandResult {
    let store = open_transfers(path)?;
    let transfer = store
        .transfer(id)
        .ok_or_else(|| format!("Transfer {id} not found"))?;
    let chunks = show_chunks.then(|| store.chunks(id).iter().map(ChunkSummary::from).collect());
    let output = StatusOutput {
        transfer: &transfer,
        chunks,
    };

    if format == "json" {
        return print_json(&output);
    }

    let t = output.transfer;
    println!("Transfer {}", t.transfer_id);
    println!("  Operation:   {}", t.operation_kind);
    println!("  Category:    {}", t.category);
    println!("  Status:      {}", t.status);
    println!(
        "  Items:       {}/{} done, {} failed, {} chunked",
        t.completed_items, t.total_items, t.failed_items, t.materialized_items
    );
    println!("  Chunk size:  {}", t.chunk_size);
    println!("  Checksum:    {}", t.checksum);
    println!("  Created:     {}", format_ms(t.created_at));
    println!("  Updated:     {}", format_ms(t.last_update));
    if let Some(err) = &t.error_message {
        println!("  Error:       {}", err);
    }
    if let Some(chunks) = &output.chunks {
        println!();
        println!("  {:>5} {:>7} {:>6} {:<10} {:>8}", "INDEX", "START", "ITEMS", "STATUS", "ATTEMPTS");
        for c in chunks {
            println!(
                "  {:>5} {:>7} {:>6} {:<10} {:>8}",
                c.chunk_index, c.start, c.items, c.status, c.attempts
            );
        }
    }
    Ok(())
}
