//! Verify command implementation.

use objdb_core::{Manifest, WalRecord, WalRecordIterator};
use objdb_storage::{FileBackend, StorageBackend};
use std::collections::BTreeSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Transactions with a commit record.
    pub committed: usize,
    /// Transactions begun but never committed.
    pub incomplete: usize,
    /// Bytes after the last complete record.
    pub torn_bytes: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
///
/// Works on the files directly and never takes the store lock, so it can
/// look at a store another process has open.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let mut ok = true;

    let manifest_path = path.join("MANIFEST");
    if manifest_path.exists() {
        match Manifest::decode(&std::fs::read(&manifest_path)?) {
            Ok(manifest) => println!(
                "Manifest: {} types, fingerprint {}, bootstrapped: {}",
                manifest.schema.len(),
                manifest.fingerprint,
                manifest.bootstrapped
            ),
            Err(err) => {
                println!("Manifest: {err}");
                ok = false;
            }
        }
    } else {
        println!("Manifest not found");
        ok = false;
    }

    let wal_path = path.join("wal.log");
    if wal_path.exists() {
        println!("Checking WAL...");
        let backend = FileBackend::open(&wal_path)?;
        let result = verify_wal(&backend)?;
        print_result(&result);
        ok &= result.is_ok();
    } else {
        println!("WAL file not found (this may be normal for new stores)");
    }

    println!();
    if ok {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

/// Walks the WAL, checking framing, checksums and transaction structure.
pub fn verify_wal(backend: &dyn StorageBackend) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let data = backend.read_all()?;
    let mut result = VerifyResult::default();
    let mut open = BTreeSet::new();
    let mut iter = WalRecordIterator::new(&data);

    for item in iter.by_ref() {
        let (offset, record) = match item {
            Ok(item) => item,
            Err(err) => {
                result.errors.push(err.to_string());
                break;
            }
        };
        result.records_checked += 1;
        match record {
            WalRecord::Begin { txid } => {
                if !open.insert(txid) {
                    result.errors.push(format!("offset {offset}: {txid} begun twice"));
                }
            }
            WalRecord::Put { txid, .. } | WalRecord::Delete { txid, .. } | WalRecord::Bootstrapped { txid } => {
                if !open.contains(&txid) {
                    result.errors.push(format!("offset {offset}: write for unknown {txid}"));
                }
            }
            WalRecord::Commit { txid, .. } => {
                if open.remove(&txid) {
                    result.committed += 1;
                } else {
                    result.errors.push(format!("offset {offset}: commit for unknown {txid}"));
                }
            }
            WalRecord::Checkpoint { .. } => {}
        }
    }

    result.incomplete = open.len();
    if iter.has_torn_tail() {
        result.torn_bytes = data.len() as u64 - iter.valid_len();
    }
    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Records checked: {}", result.records_checked);
    println!("  Committed transactions: {}", result.committed);
    if result.incomplete > 0 {
        println!("  Incomplete transactions: {} (discarded on open)", result.incomplete);
    }
    if result.torn_bytes > 0 {
        println!("  Torn tail: {} bytes (discarded on open)", result.torn_bytes);
    }
    for error in &result.errors {
        println!("  ERROR: {error}");
    }
}
