//! Checkpoint command implementation.

use objdb_core::Store;
use std::path::Path;

/// Runs the checkpoint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open_existing(path)?;
    let wal_path = path.join("wal.log");
    let before = std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);

    store.checkpoint()?;
    let after = std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
    let generation = store.generation();
    store.close()?;

    println!("Checkpoint written at {generation}");
    println!("WAL: {before} -> {after} bytes");
    Ok(())
}
