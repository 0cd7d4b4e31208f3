//! Verify, repair and stats commands.

use super::{open_integrity, print_json, CommandResult};
use std::path::Path;
use std::sync::Arc;
use stockferry_core::{
    Category, IntegrityReport, IntegrityVerifier, MemoryRecordSource, Record, SystemClock,
};

/// Loads a JSON array of records.
pub fn load_records(file: &Path) -> CommandResult<Vec<Record>> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("Cannot read records from {:?}: {e}", file))?;
    let records: Vec<Record> = serde_json::from_str(&text)
        .map_err(|e| format!("Invalid records file {:?}: {e}", file))?;
    Ok(records)
}

fn verifier(path: &Path, records: &Path) -> CommandResult<IntegrityVerifier> {
    let store = open_integrity(path)?;
    let source = MemoryRecordSource::from_records(load_records(records)?);
    Ok(IntegrityVerifier::new(
        store,
        Arc::new(source),
        Arc::new(SystemClock),
    ))
}

/// Runs the verify command.
pub fn verify(path: &Path, records: &Path, category: Option<&str>, format: &str) -> CommandResult {
    let category = category.map(str::parse::<Category>).transpose()?;
    let report = verifier(path, records)?.verify(category)?;
    match format {
        "json" => print_json(&report)?,
        _ => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &IntegrityReport) {
    println!("Integrity score: {:.1}", report.integrity_score);
    println!("  Total items:      {}", report.total_items);
    println!("  Complete:         {}", report.complete_items);
    println!("  Metadata drift:   {}", report.incomplete_items);
    println!("  Corrupted:        {}", report.corrupted_items);
    println!("  Missing locally:  {}", report.missing_items);

    if !report.issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &report.issues {
            println!(
                "  [{:?}] {} {}/{}: {}",
                issue.severity,
                issue.kind.as_str(),
                issue.category,
                issue.item_id,
                issue.description
            );
        }
    }
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for line in &report.recommendations {
            println!("  - {line}");
        }
    }
}

/// Runs the repair command.
pub fn repair(path: &Path, records: &Path, category: &str, id: &str) -> CommandResult {
    let category: Category = category.parse()?;
    if verifier(path, records)?.repair(id, category)? {
        println!("Repaired {category}/{id}");
        Ok(())
    } else {
        Err(format!("Cannot repair {category}/{id}: local data missing").into())
    }
}

/// Runs the stats command.
pub fn stats(path: &Path, format: &str) -> CommandResult {
    let store = open_integrity(path)?;
    let verifier = IntegrityVerifier::new(
        store,
        Arc::new(MemoryRecordSource::new()),
        Arc::new(SystemClock),
    );
    let stats = verifier.statistics();
    if format == "json" {
        return print_json(&stats);
    }

    println!("Checksums (complete/total):");
    for (category, tally) in &stats.checksums {
        println!("  {:<10} {}/{}", category, tally.good, tally.total);
    }
    println!("Issues (resolved/total):");
    for (kind, tally) in &stats.issues {
        println!("  {:<18} {}/{}", kind.as_str(), tally.good, tally.total);
    }
    println!("Repairs (succeeded/total):");
    for (kind, tally) in &stats.repairs {
        println!("  {:<18} {}/{}", kind, tally.good, tally.total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RECORDS: &str = r#"[
        {"kind": "component", "id": "c-1", "name": "NE555", "quantity": 40},
        {"kind": "package", "id": "p-1", "name": "DIP-8", "pin_count": 8, "category": "dip"}
    ]"#;

    #[test]
    fn loads_tagged_records() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("records.json");
        std::fs::write(&file, RECORDS).unwrap();

        let records = load_records(&file).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category(), Category::Component);
        assert_eq!(records[1].id(), "p-1");
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("records.json");
        std::fs::write(&file, "{not json").unwrap();

        let err = load_records(&file).unwrap_err();
        assert!(err.to_string().contains("Invalid records file"));
    }

    #[test]
    fn verify_then_repair_round() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("records.json");
        std::fs::write(&file, RECORDS).unwrap();

        verify(dir.path(), &file, None, "json").unwrap();
        verify(dir.path(), &file, Some("package"), "text").unwrap();
        repair(dir.path(), &file, "component", "c-1").unwrap();
        assert!(repair(dir.path(), &file, "pallet", "nope").is_err());
        assert!(verify(dir.path(), &file, Some("widgets"), "text").is_err());
        stats(dir.path(), "text").unwrap();
    }
}
