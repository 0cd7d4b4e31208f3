//! CLI command implementations.

pub mod cleanup;
pub mod compact;
pub mod inspect;
pub mod integrity;
pub mod transfers;

use std::error::Error;
use std::path::Path;
use stockferry_core::{IntegrityStore, StateStore, StoreConfig, INTEGRITY_LOG, TRANSFERS_LOG};

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// Opens the transfer store of an existing state directory.
pub fn open_transfers(path: &Path) -> CommandResult<StateStore> {
    if !path.join(TRANSFERS_LOG).exists() {
        return Err(format!("No transfer log found at {:?}", path).into());
    }
    Ok(StateStore::open_dir(path, StoreConfig::default())?)
}

/// Opens (creating if needed) the integrity store of a state directory.
pub fn open_integrity(path: &Path) -> CommandResult<IntegrityStore> {
    if !path.exists() {
        return Err(format!("State directory {:?} does not exist", path).into());
    }
    Ok(IntegrityStore::open_dir(path, StoreConfig::default())?)
}

/// Renders a millisecond timestamp as seconds since the epoch.
pub fn format_ms(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_millis() {
        assert_eq!(format_ms(1_700_000_000_042), "1700000000.042");
        assert_eq!(format_ms(5), "0.005");
    }

    #[test]
    fn missing_transfer_log_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(open_transfers(dir.path()).is_err());
        assert!(open_integrity(&dir.path().join("absent")).is_err());
    }
}
