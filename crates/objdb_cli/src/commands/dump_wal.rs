//! Dump WAL command implementation.

use objdb_core::{WalRecord, WalRecordIterator};
use objdb_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// WAL record representation for output.
#[derive(Debug, Serialize)]
pub struct WalRecordInfo {
    /// Offset in the WAL file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Transaction ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// Collection ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<u32>,
    /// Primary key (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Generation (commit and checkpoint records).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Property payload size in bytes (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
}

impl WalRecordInfo {
    fn new(offset: u64, record: &WalRecord) -> Self {
        let mut info = Self {
            offset,
            record_type: format!("{:?}", record.record_type()).to_uppercase(),
            txid: record.txid().map(|t| t.as_u64()),
            collection_id: None,
            key: None,
            generation: None,
            payload_size: None,
        };
        match record {
            WalRecord::Put {
                collection_id,
                key,
                properties,
                ..
            } => {
                info.collection_id = Some(collection_id.as_u32());
                info.key = Some(key.to_string());
                info.payload_size = Some(properties.len());
            }
            WalRecord::Delete {
                collection_id, key, ..
            } => {
                info.collection_id = Some(collection_id.as_u32());
                info.key = Some(key.to_string());
            }
            WalRecord::Commit { generation, .. } | WalRecord::Checkpoint { generation } => {
                info.generation = Some(generation.as_u64());
            }
            WalRecord::Begin { .. } | WalRecord::Bootstrapped { .. } => {}
        }
        info
    }
}

/// Runs the dump-wal command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let wal_path = path.join("wal.log");

    if !wal_path.exists() {
        return Err("WAL file not found".into());
    }

    let backend = FileBackend::open(&wal_path)?;
    let records = read_wal_records(&backend, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Decodes up to `limit` records from the start of the log.
pub fn read_wal_records(
    backend: &dyn StorageBackend,
    limit: Option<usize>,
) -> Result<Vec<WalRecordInfo>, Box<dyn std::error::Error>> {
    let data = backend.read_all()?;
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    for item in WalRecordIterator::new(&data).take(max_records) {
        let (offset, record) = item?;
        records.push(WalRecordInfo::new(offset, &record));
    }

    Ok(records)
}

fn print_text_output(records: &[WalRecordInfo]) {
    println!("WAL Records ({} total)", records.len());
    println!("==========================================");
    println!();

    for record in records {
        let mut line = format!("{:>8}  {:<12}", record.offset, record.record_type);
        if let Some(txid) = record.txid {
            line.push_str(&format!(" txid={txid}"));
        }
        if let Some(collection_id) = record.collection_id {
            line.push_str(&format!(" collection={collection_id}"));
        }
        if let Some(key) = &record.key {
            line.push_str(&format!(" key={key}"));
        }
        if let Some(generation) = record.generation {
            line.push_str(&format!(" generation={generation}"));
        }
        if let Some(size) = record.payload_size {
            line.push_str(&format!(" payload={size}B"));
        }
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_core::{feature_flags, FlagBinding, Store};
    use tempfile::TempDir;

    #[test]
    fn dump_lists_bootstrap_and_commits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let store = Store::open([feature_flags::schema()], &path, |tx| feature_flags::seed(tx, ["a"])).unwrap();
        FlagBinding::new(&store).unwrap().write_flag("a", true).unwrap();
        store.close().unwrap();

        let backend = FileBackend::open(&path.join("wal.log")).unwrap();
        let records = read_wal_records(&backend, None).unwrap();
        let types: Vec<_> = records.iter().map(|r| r.record_type.as_str()).collect();
        assert_eq!(
            types,
            ["BEGIN", "PUT", "BOOTSTRAPPED", "COMMIT", "BEGIN", "PUT", "COMMIT"]
        );
        assert_eq!(records[1].key.as_deref(), Some("a"));
        assert_eq!(records[6].generation, Some(2));

        let limited = read_wal_records(&backend, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }
}
